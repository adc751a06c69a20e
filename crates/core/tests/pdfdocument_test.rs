//! End-to-end tests for PDFDocument: xref loading, object resolution,
//! recovery from damaged files and decryption.

mod common;

use std::sync::Arc;

use common::{PdfBuilder, flate, simple_pdf};
use folio_core::codec::aes_cbc_encrypt;
use folio_core::document::security::{CryptAlgorithm, decrypt_bytes, object_key};
use folio_core::document::{SectionKind, XRefEntry};
use folio_core::{Diagnostic, OpenOptions, PDFDocument, PDFObjRef, PDFObject, PdfError};

fn replace_once_fixed_len(input: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    assert_eq!(
        needle.len(),
        replacement.len(),
        "replacement must preserve byte length for stable offsets"
    );
    let pos = input
        .windows(needle.len())
        .position(|window| window == needle)
        .expect("needle not found");
    let mut out = input.to_vec();
    out[pos..pos + needle.len()].copy_from_slice(replacement);
    out
}

fn string_of(obj: &PDFObject) -> &[u8] {
    obj.as_string().expect("expected a string")
}

fn title_of(doc: &PDFDocument) -> Vec<u8> {
    let info = doc.info();
    let dict = info.dict().expect("info dictionary");
    doc.resolve(dict.get("Title").expect("title"))
        .as_string()
        .expect("title string")
        .to_vec()
}

// ---------------------------------------------------------------------------
// Basic loading
// ---------------------------------------------------------------------------

#[test]
fn test_simple_document_loads_cleanly() {
    let doc = PDFDocument::open(simple_pdf(), None).expect("open");

    assert!(!doc.is_reconstructed());
    assert!(!doc.is_encrypted());
    assert!(doc.diagnostics().is_empty());
    assert_eq!(doc.xref().sections().len(), 1);
    assert_eq!(doc.xref().sections()[0].kind, SectionKind::Classic);
    assert_eq!(doc.xref().object_ids(), vec![0, 1, 2, 3]);

    let trailer = doc.trailer_info();
    assert_eq!(trailer.size, Some(4));
    assert_eq!(trailer.root, Some(PDFObjRef::new(1, 0)));
    assert_eq!(trailer.info, Some(PDFObjRef::new(3, 0)));

    assert!(doc.catalog().dict().unwrap().is_type("Catalog"));
    assert_eq!(title_of(&doc), b"Folio test");
}

#[test]
fn test_xref_offsets_match_written_objects() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>").obj(2, "42").obj(3, "(three)");
    b.classic_section("/Size 4 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    for objid in 1..=3 {
        assert_eq!(
            doc.xref().entry(objid),
            Some(&XRefEntry::InFile {
                offset: b.offset_of(objid),
                genno: 0
            })
        );
    }
    assert_eq!(doc.xref().entry(0), Some(&XRefEntry::Free { genno: 65535 }));
    assert_eq!(*doc.fetch(2, 0), PDFObject::Int(42));
    assert_eq!(string_of(&doc.fetch(3, 0)), b"three");
}

#[test]
fn test_fetch_is_cached() {
    let doc = PDFDocument::open(simple_pdf(), None).unwrap();

    let first = doc.fetch(2, 0);
    let second = doc.fetch(2, 0);
    assert!(Arc::ptr_eq(&first, &second));

    let stats = doc.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.len, 1);
}

#[test]
fn test_zero_capacity_cache_still_resolves() {
    let doc = OpenOptions::new()
        .cache_capacity(0)
        .open_bytes(simple_pdf())
        .unwrap();
    let a = doc.fetch(1, 0);
    let b = doc.fetch(1, 0);
    assert_eq!(a, b);
    assert_eq!(doc.cache_stats().len, 0);
}

#[test]
fn test_object_zero_and_unknown_objects_are_null() {
    let doc = PDFDocument::open(simple_pdf(), None).unwrap();

    let zero = doc.fetch_with_diagnostics(0, 0);
    assert!(zero.object.is_null());
    assert_eq!(
        zero.diagnostics,
        vec![Diagnostic::UnresolvableReference(PDFObjRef::new(0, 0))]
    );

    let missing = doc.fetch_with_diagnostics(99, 0);
    assert!(missing.object.is_null());
    assert!(!missing.is_clean());
    assert_eq!(
        missing.diagnostics,
        vec![Diagnostic::UnresolvableReference(PDFObjRef::new(99, 0))]
    );
}

#[test]
fn test_explicit_null_is_clean() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>").obj(2, "null");
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let resolved = doc.fetch_with_diagnostics(2, 0);
    assert!(resolved.object.is_null());
    assert!(resolved.is_clean());
}

#[test]
fn test_generation_mismatch_is_tolerated() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj_gen(2, 3, b"(third generation)");
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    assert_eq!(doc.xref().entry(2).map(XRefEntry::genno), Some(3));
    assert_eq!(string_of(&doc.fetch(2, 0)), b"third generation");
    assert_eq!(string_of(&doc.fetch(2, 3)), b"third generation");
}

#[test]
fn test_open_path_maps_file() {
    let path = std::env::temp_dir().join(format!("folio-open-path-{}.pdf", std::process::id()));
    std::fs::write(&path, simple_pdf()).unwrap();

    let doc = PDFDocument::open_path(&path, None).expect("open_path");
    assert_eq!(doc.bytes(), simple_pdf().as_slice());
    assert_eq!(title_of(&doc), b"Folio test");
    drop(doc);

    std::fs::remove_file(&path).unwrap();
}

// ---------------------------------------------------------------------------
// Incremental updates and cross-reference streams
// ---------------------------------------------------------------------------

#[test]
fn test_incremental_update_newest_wins() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj(2, "(original)")
        .obj(3, "(untouched)");
    let first = b.classic_section("/Size 4 /Root 1 0 R");
    b.obj(2, "(revised)");
    let second = b.classic_section(&format!("/Size 4 /Root 1 0 R /Prev {}", first));

    let doc = PDFDocument::open(b.build(), None).unwrap();
    assert_eq!(string_of(&doc.fetch(2, 0)), b"revised");
    assert_eq!(string_of(&doc.fetch(3, 0)), b"untouched");

    let sections = doc.xref().sections();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].offset, second);
    assert_eq!(sections[0].prev, Some(first));
    assert_eq!(sections[1].offset, first);
    assert_eq!(doc.trailer_info().prev, Some(first));
}

#[test]
fn test_prev_loop_terminates() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>");
    let pos = b.len();
    // The table names itself as its predecessor.
    b.classic_section(&format!("/Size 2 /Root 1 0 R /Prev {}", pos));

    let doc = PDFDocument::open(b.build(), None).unwrap();
    assert_eq!(doc.xref().sections().len(), 1);
    assert!(doc.catalog().dict().unwrap().is_type("Catalog"));
}

#[test]
fn test_section_cap_keeps_newest() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>").obj(3, "(only in the old section)");
    let first = b.classic_section("/Size 4 /Root 1 0 R");
    b.obj(2, "(new)");
    b.classic_section(&format!("/Size 4 /Root 1 0 R /Prev {}", first));

    let doc = OpenOptions::new()
        .max_xref_sections(1)
        .open_bytes(b.build())
        .unwrap();
    assert_eq!(doc.xref().sections().len(), 1);
    assert!(
        doc.diagnostics()
            .iter()
            .any(|d| matches!(d, Diagnostic::XRefCorrupt(_)))
    );
    assert_eq!(string_of(&doc.fetch(2, 0)), b"new");
    // Beyond the cap, but its header is still on disk.
    assert_eq!(string_of(&doc.fetch(3, 0)), b"only in the old section");
}

#[test]
fn test_objects_behind_broken_prev_are_found_by_scan() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj(3, "(from the lost revision)");
    b.classic_section("/Size 4 /Root 1 0 R");
    b.obj(2, "(update)");
    b.classic_section("/Size 4 /Root 1 0 R /Prev 5");

    let doc = PDFDocument::open(b.build(), None).unwrap();
    assert!(!doc.is_reconstructed());
    assert_eq!(doc.xref().sections().len(), 1);
    assert!(
        doc.diagnostics()
            .iter()
            .any(|d| matches!(d, Diagnostic::XRefCorrupt(_)))
    );

    let lost = doc.fetch_with_diagnostics(3, 0);
    assert!(lost.is_clean(), "{:?}", lost.diagnostics);
    assert_eq!(string_of(&lost.object), b"from the lost revision");
    assert_eq!(string_of(&doc.fetch(2, 0)), b"update");
    assert!(doc.catalog().dict().unwrap().is_type("Catalog"));
}

#[test]
fn test_xref_stream_and_object_stream() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object_stream(
        5,
        &[
            (2, "<< /Type /Pages /Kids [] /Count 0 >>"),
            (3, "(packed string)"),
        ],
    );
    b.stream_section(6, "/Size 7 /Root 1 0 R");

    let doc = PDFDocument::open(b.build(), None).unwrap();
    assert_eq!(doc.xref().sections()[0].kind, SectionKind::Stream);
    assert_eq!(
        doc.xref().entry(3),
        Some(&XRefEntry::InObjectStream {
            container: 5,
            index: 1
        })
    );

    let resolved = doc.fetch_with_diagnostics(3, 0);
    assert!(resolved.is_clean(), "{:?}", resolved.diagnostics);
    assert_eq!(string_of(&resolved.object), b"packed string");

    let catalog = doc.catalog();
    let pages = doc.resolve(catalog.dict().unwrap().get("Pages").unwrap());
    assert!(pages.dict().unwrap().is_type("Pages"));

    // Stream-only keys do not leak into the trailer view.
    assert!(doc.trailer_info().dict.get("W").is_none());
    assert_eq!(doc.trailer_info().size, Some(7));
}

#[test]
fn test_hybrid_xref_stream_overrides_classic_table() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>").obj(2, "(original)");
    let first = b.classic_section("/Size 5 /Root 1 0 R");

    b.obj(2, "(stream view)");
    let stm = b.stream_section(4, "/Size 5");
    b.obj(2, "(classic view)");
    b.classic_section(&format!(
        "/Size 5 /Root 1 0 R /Prev {} /XRefStm {}",
        first, stm
    ));

    let doc = PDFDocument::open(b.build(), None).unwrap();
    assert_eq!(string_of(&doc.fetch(2, 0)), b"stream view");

    let kinds: Vec<SectionKind> = doc.xref().sections().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![SectionKind::Stream, SectionKind::Classic, SectionKind::Classic]
    );
    assert_eq!(doc.xref().sections()[0].offset, stm);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[test]
fn test_bad_startxref_triggers_reconstruction() {
    let mut data = simple_pdf();
    data.extend_from_slice(b"startxref\n99999999\n%%EOF\n");

    let doc = PDFDocument::open(data, None).unwrap();
    assert!(doc.is_reconstructed());
    assert!(matches!(doc.diagnostics(), [Diagnostic::XRefCorrupt(_)]));
    assert_eq!(doc.xref().sections()[0].kind, SectionKind::Reconstructed);
    assert!(doc.catalog().dict().unwrap().is_type("Catalog"));
    assert_eq!(title_of(&doc), b"Folio test");
}

#[test]
fn test_reconstruction_can_be_disabled() {
    let mut data = simple_pdf();
    data.extend_from_slice(b"startxref\n99999999\n%%EOF\n");

    let err = OpenOptions::new()
        .reconstruct_on_failure(false)
        .open_bytes(data)
        .unwrap_err();
    assert!(matches!(err, PdfError::NoValidXRef));
}

#[test]
fn test_no_objects_at_all_fails() {
    let err = PDFDocument::open(&b"%PDF-1.7\nnothing to see here\n"[..], None).unwrap_err();
    assert!(matches!(err, PdfError::NoValidXRef));
}

#[test]
fn test_reconstruction_finds_objects_inside_object_streams() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object_stream(5, &[(2, "<< /Type /Pages /Count 0 >>"), (3, "(hidden)")]);
    b.stream_section(6, "/Size 7 /Root 1 0 R");
    b.raw(b"startxref\n99999999\n%%EOF\n");

    let doc = PDFDocument::open(b.build(), None).unwrap();
    assert!(doc.is_reconstructed());
    assert_eq!(doc.trailer_info().root, Some(PDFObjRef::new(1, 0)));
    assert_eq!(string_of(&doc.fetch(3, 0)), b"hidden");
    let pages = doc.fetch(2, 0);
    assert!(pages.dict().unwrap().is_type("Pages"));
}

#[test]
fn test_wrong_xref_offset_uses_scanned_header() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj(2, "(two)")
        .obj(3, "(three)");
    b.classic_section("/Size 4 /Root 1 0 R");
    let needle = format!("{:010} 00000 n", b.offset_of(2));
    let wrong = format!("{:010} 00000 n", b.offset_of(3));
    let data = replace_once_fixed_len(&b.build(), needle.as_bytes(), wrong.as_bytes());

    let doc = PDFDocument::open(data, None).unwrap();
    assert!(!doc.is_reconstructed());
    assert_eq!(string_of(&doc.fetch(2, 0)), b"two");
}

#[test]
fn test_short_stream_length_is_recovered() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .stream_with_length(2, "", b"Hello, world!", "5");
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let resolved = doc.fetch_with_diagnostics(2, 0);
    assert_eq!(
        resolved.diagnostics,
        vec![Diagnostic::MalformedStreamLength {
            declared: Some(5),
            actual: 13
        }]
    );
    let stream = resolved.object.as_stream().unwrap();
    assert_eq!(stream.raw(), b"Hello, world!");
    assert_eq!(&doc.decoded_stream_bytes(stream)[..], b"Hello, world!");
}

#[test]
fn test_diagnostic_display() {
    let diag = Diagnostic::MalformedStreamLength {
        declared: Some(5),
        actual: 13,
    };
    insta::assert_snapshot!(diag.to_string(), @"stream /Length 5 is wrong, recovered 13");
    insta::assert_snapshot!(
        Diagnostic::CyclicReference(PDFObjRef::new(6, 0)).to_string(),
        @"cyclic reference 6 0 R"
    );
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

#[test]
fn test_self_referencing_dictionary_resolves() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Self 1 0 R >>");
    b.classic_section("/Size 2 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let catalog = doc.catalog();
    let again = doc.resolve(catalog.dict().unwrap().get("Self").unwrap());
    assert!(Arc::ptr_eq(&catalog, &again));
}

#[test]
fn test_reference_cycles_resolve_to_null() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj(4, "5 0 R")
        .obj(5, "4 0 R")
        .obj(6, "6 0 R");
    b.classic_section("/Size 7 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let selfish = doc.resolve_with_diagnostics(&PDFObject::Ref(PDFObjRef::new(6, 0)));
    assert!(selfish.object.is_null());
    assert!(
        selfish
            .diagnostics
            .contains(&Diagnostic::CyclicReference(PDFObjRef::new(6, 0)))
    );

    let pair = doc.resolve_with_diagnostics(&PDFObject::Ref(PDFObjRef::new(4, 0)));
    assert!(pair.object.is_null());
    assert!(
        pair.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::CyclicReference(_)))
    );
}

#[test]
fn test_stream_length_referring_to_itself() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .stream_with_length(7, "", b"abcdef", "7 0 R");
    b.classic_section("/Size 8 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let resolved = doc.fetch_with_diagnostics(7, 0);
    assert_eq!(
        resolved.diagnostics,
        vec![Diagnostic::MalformedStreamLength {
            declared: None,
            actual: 6
        }]
    );
    assert_eq!(resolved.object.as_stream().unwrap().raw(), b"abcdef");
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

#[test]
fn test_flate_with_png_predictor() {
    let rows: [u8; 14] = [1, 1, 2, 3, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1];
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>").stream(
        2,
        "/Filter /FlateDecode /DecodeParms << /Predictor 15 /Colors 3 /BitsPerComponent 8 /Columns 2 >>",
        &flate(&rows),
    );
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let obj = doc.fetch(2, 0);
    let decoded = doc.decode_stream(obj.as_stream().unwrap());
    assert!(decoded.is_complete());
    assert_eq!(&decoded.data[..], &[1, 2, 3, 2, 3, 4, 2, 3, 4, 3, 4, 5]);
}

#[test]
fn test_flate_with_tiff_predictor() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>").stream(
        2,
        "/Filter [/FlateDecode] /DecodeParms [<< /Predictor 2 /Colors 3 /Columns 2 >>]",
        &flate(&[10, 20, 30, 1, 2, 3]),
    );
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let obj = doc.fetch(2, 0);
    let data = doc.decoded_stream_bytes(obj.as_stream().unwrap());
    assert_eq!(&data[..], &[10, 20, 30, 11, 22, 33]);
}

#[test]
fn test_predictor_with_overflowing_columns_is_reported() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>").stream(
        2,
        "/Filter /FlateDecode /DecodeParms << /Predictor 12 /Colors 8 /Columns 2305843009213693952 >>",
        &flate(&[0, 1, 2, 3]),
    );
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let obj = doc.fetch(2, 0);
    let decoded = doc.decode_stream(obj.as_stream().unwrap());
    // Inflated but not un-predicted.
    assert_eq!(&decoded.data[..], &[0, 1, 2, 3]);
    assert!(matches!(
        decoded.diagnostic,
        Some(Diagnostic::DecodeFailed {
            filter: "FlateDecode",
            ..
        })
    ));
}

#[test]
fn test_indirect_length_and_filter() {
    let payload = flate(b"indirect everything");
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .stream_with_length(4, "/Filter 6 0 R", &payload, "5 0 R")
        .obj(5, &payload.len().to_string())
        .obj(6, "/FlateDecode");
    b.classic_section("/Size 7 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let resolved = doc.fetch_with_diagnostics(4, 0);
    assert!(resolved.is_clean(), "{:?}", resolved.diagnostics);
    let data = doc.decoded_stream_bytes(resolved.object.as_stream().unwrap());
    assert_eq!(&data[..], b"indirect everything");
}

#[test]
fn test_unsupported_filter_keeps_raw_bytes() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .stream(2, "/Filter /JBIG2Decode", b"\x97JB2 payload");
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let obj = doc.fetch(2, 0);
    let decoded = doc.decode_stream(obj.as_stream().unwrap());
    assert_eq!(&decoded.data[..], b"\x97JB2 payload");
    assert_eq!(
        decoded.diagnostic,
        Some(Diagnostic::UnsupportedFilter("JBIG2Decode".into()))
    );
}

#[test]
fn test_decoded_size_cap() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .stream(2, "/Filter /FlateDecode", &flate(&[0u8; 4096]));
    b.classic_section("/Size 3 /Root 1 0 R");
    let doc = OpenOptions::new()
        .max_decoded_size(100)
        .open_bytes(b.build())
        .unwrap();

    let obj = doc.fetch(2, 0);
    let decoded = doc.decode_stream(obj.as_stream().unwrap());
    assert_eq!(decoded.data.len(), 100);
    assert!(matches!(
        decoded.diagnostic,
        Some(Diagnostic::DecodeFailed {
            filter: "FlateDecode",
            ..
        })
    ));
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

const RC4_128_O: &str = "d048d1529e535d1884cd3856367b184b4a90df01e637d16eca065baf4e64900b";
const RC4_128_U: &str = "093412363b9d327c7ac50144c7c755f100000000000000000000000000000000";
const RC4_DOCID: &str = "651a94feeb7868d312a97b377270860e";
const RC4_128_KEY: &str = "c2a59ca0a50e5b4ccff13e4bcf0e3b18";

fn rc4_encrypted_pdf() -> Vec<u8> {
    let key = hex::decode(RC4_128_KEY).unwrap();
    let seal = |objid: u32, plain: &[u8]| {
        let k = object_key(&key, objid, 0, CryptAlgorithm::Rc4);
        decrypt_bytes(&k, CryptAlgorithm::Rc4, plain)
    };

    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj(
            3,
            &format!("<< /Title <{}> >>", hex::encode(seal(3, b"Sealed title"))),
        )
        .obj(
            4,
            &format!(
                "<< /Filter /Standard /V 2 /R 3 /Length 128 /P -4 /O <{}> /U <{}> >>",
                RC4_128_O, RC4_128_U
            ),
        )
        .stream(5, "", &seal(5, b"BT /F1 12 Tf (hi) Tj ET"));
    b.classic_section(&format!(
        "/Size 6 /Root 1 0 R /Info 3 0 R /Encrypt 4 0 R /ID [<{0}> <{0}>]",
        RC4_DOCID
    ));
    b.build()
}

#[test]
fn test_rc4_document_user_password() {
    let doc = PDFDocument::open(rc4_encrypted_pdf(), Some("baz")).unwrap();
    assert!(doc.is_encrypted());
    assert_eq!(title_of(&doc), b"Sealed title");

    let stream = doc.fetch(5, 0);
    let content = doc.decoded_stream_bytes(stream.as_stream().unwrap());
    assert_eq!(&content[..], b"BT /F1 12 Tf (hi) Tj ET");
}

#[test]
fn test_rc4_document_owner_password() {
    let doc = OpenOptions::new()
        .password("foo")
        .open_bytes(rc4_encrypted_pdf())
        .unwrap();
    assert_eq!(title_of(&doc), b"Sealed title");
}

#[test]
fn test_encrypt_dictionary_is_not_decrypted() {
    let doc = PDFDocument::open(rc4_encrypted_pdf(), Some("baz")).unwrap();
    let encrypt = doc.fetch(4, 0);
    let o = encrypt.dict().unwrap().get("O").unwrap();
    assert_eq!(string_of(o), hex::decode(RC4_128_O).unwrap().as_slice());
}

#[test]
fn test_rc4_document_rejects_bad_passwords() {
    for password in [Some("wrong"), None] {
        let err = PDFDocument::open(rc4_encrypted_pdf(), password).unwrap_err();
        assert!(
            matches!(err, PdfError::DecryptionAuthFailure),
            "{:?}: {}",
            password,
            err
        );
    }
}

const AES_O: &str = "0ba3835f88f90388e74e54584125ce142be0de24c6b0d37746e075b891756671";
const AES_U: &str = "ff6c2b354a3699b075ee57b9c7624a4800000000000000000000000000000000";
const AES_DOCID: &str = "101112131415161718191a1b1c1d1e1f";
const AES_KEY: &str = "ad8965a41208a34fc485894ed1d90fe8";

fn aes_seal(key: &[u8], objid: u32, plain: &[u8]) -> Vec<u8> {
    let k = object_key(key, objid, 0, CryptAlgorithm::Aes128);
    let iv: Vec<u8> = (0..16).map(|i| i as u8 * 3).collect();
    let pad = 16 - plain.len() % 16;
    let mut padded = plain.to_vec();
    padded.extend(std::iter::repeat_n(pad as u8, pad));
    let mut out = iv.clone();
    out.extend(aes_cbc_encrypt(&k, &iv, &padded).unwrap());
    out
}

#[test]
fn test_aes128_document() {
    let key = hex::decode(AES_KEY).unwrap();
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj(
            3,
            &format!(
                "<< /Title <{}> >>",
                hex::encode(aes_seal(&key, 3, b"AES protected"))
            ),
        )
        .obj(
            4,
            &format!(
                "<< /Filter /Standard /V 4 /R 4 /Length 128 /P -4 /O <{}> /U <{}> \
                 /CF << /StdCF << /CFM /AESV2 /Length 16 /AuthEvent /DocOpen >> >> \
                 /StmF /StdCF /StrF /StdCF >>",
                AES_O, AES_U
            ),
        )
        .stream(5, "", &aes_seal(&key, 5, b"q 1 0 0 1 0 0 cm Q"));
    b.classic_section(&format!(
        "/Size 6 /Root 1 0 R /Info 3 0 R /Encrypt 4 0 R /ID [<{0}> <{0}>]",
        AES_DOCID
    ));
    let data = b.build();

    for password in ["user", "owner"] {
        let doc = PDFDocument::open(data.clone(), Some(password)).unwrap();
        assert_eq!(title_of(&doc), b"AES protected");
        let stream = doc.fetch(5, 0);
        let content = doc.decoded_stream_bytes(stream.as_stream().unwrap());
        assert_eq!(&content[..], b"q 1 0 0 1 0 0 cm Q");
    }

    let err = PDFDocument::open(data, None).unwrap_err();
    assert!(matches!(err, PdfError::DecryptionAuthFailure));
}

#[test]
fn test_named_crypt_filter_decrypts_and_chain_continues() {
    let key = hex::decode(AES_KEY).unwrap();
    let rc4_seal = |objid: u32, plain: &[u8]| {
        let k = object_key(&key, objid, 0, CryptAlgorithm::Rc4);
        decrypt_bytes(&k, CryptAlgorithm::Rc4, plain)
    };
    let sealed_missing = rc4_seal(7, &flate(b"unreadable"));

    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog >>")
        .obj(
            4,
            &format!(
                "<< /Filter /Standard /V 4 /R 4 /Length 128 /P -4 /O <{}> /U <{}> \
                 /CF << /StdCF << /CFM /AESV2 >> /Plain << /CFM /V2 >> >> \
                 /StmF /StdCF /StrF /StdCF >>",
                AES_O, AES_U
            ),
        )
        .stream(
            6,
            "/Filter [/Crypt /FlateDecode] /DecodeParms [<< /Name /Plain >> null]",
            &rc4_seal(6, &flate(b"named filter")),
        )
        .stream(
            7,
            "/Filter [/Crypt /FlateDecode] /DecodeParms [<< /Name /Missing >> null]",
            &sealed_missing,
        );
    b.classic_section(&format!(
        "/Size 8 /Root 1 0 R /Encrypt 4 0 R /ID [<{0}> <{0}>]",
        AES_DOCID
    ));
    let doc = PDFDocument::open(b.build(), Some("user")).unwrap();

    let named = doc.fetch(6, 0);
    let decoded = doc.decode_stream(named.as_stream().unwrap());
    assert!(decoded.is_complete(), "{:?}", decoded.diagnostic);
    assert_eq!(&decoded.data[..], b"named filter");

    let missing = doc.fetch(7, 0);
    let decoded = doc.decode_stream(missing.as_stream().unwrap());
    assert_eq!(&decoded.data[..], sealed_missing.as_slice());
    assert_eq!(
        decoded.diagnostic,
        Some(Diagnostic::UnsupportedFilter("Crypt/Missing".into()))
    );
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_fetches_agree() {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object_stream(
        5,
        &[
            (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
            (3, "<< /Type /Page /Parent 2 0 R >>"),
        ],
    );
    b.stream_section(6, "/Size 7 /Root 1 0 R");
    let doc = PDFDocument::open(b.build(), None).unwrap();

    let results: Vec<Vec<Arc<PDFObject>>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| (1..=3).map(|id| doc.fetch(id, 0)).collect::<Vec<_>>()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for objs in &results[1..] {
        for (a, b) in objs.iter().zip(&results[0]) {
            assert!(Arc::ptr_eq(a, b));
        }
    }
    assert!(results[0][2].dict().unwrap().is_type("Page"));
}
