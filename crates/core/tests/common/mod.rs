//! Synthesizes PDF files for integration tests.
//!
//! Objects are written in order and their offsets recorded; each `*_section`
//! call emits an index for the objects written since the previous one.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::BTreeMap;
use std::io::Write;

pub fn flate(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Where an object landed: in the file, or inside an object stream.
#[derive(Debug, Clone, Copy)]
enum Slot {
    File { offset: usize, genno: u16 },
    Packed { container: u32, index: u32 },
}

pub struct PdfBuilder {
    buf: Vec<u8>,
    pending: BTreeMap<u32, Slot>,
    offsets: BTreeMap<u32, usize>,
    sections: usize,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            buf: b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n".to_vec(),
            pending: BTreeMap::new(),
            offsets: BTreeMap::new(),
            sections: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Latest offset written for `objid`.
    pub fn offset_of(&self, objid: u32) -> usize {
        self.offsets[&objid]
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn obj(&mut self, objid: u32, body: &str) -> &mut Self {
        self.obj_gen(objid, 0, body.as_bytes())
    }

    pub fn obj_gen(&mut self, objid: u32, genno: u16, body: &[u8]) -> &mut Self {
        let offset = self.buf.len();
        write!(self.buf, "{} {} obj\n", objid, genno).unwrap();
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
        self.pending.insert(objid, Slot::File { offset, genno });
        self.offsets.insert(objid, offset);
        self
    }

    /// A stream whose `/Length` is the true payload length.
    pub fn stream(&mut self, objid: u32, dict: &str, data: &[u8]) -> &mut Self {
        self.stream_with_length(objid, dict, data, &data.len().to_string())
    }

    /// A stream with an arbitrary `/Length` value (wrong or indirect).
    pub fn stream_with_length(
        &mut self,
        objid: u32,
        dict: &str,
        data: &[u8],
        length: &str,
    ) -> &mut Self {
        let mut body = format!("<< {} /Length {} >>\nstream\n", dict, length).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.obj_gen(objid, 0, &body)
    }

    /// Pack `objects` into a Flate-compressed object stream `container`.
    pub fn object_stream(&mut self, container: u32, objects: &[(u32, &str)]) -> &mut Self {
        let mut header = String::new();
        let mut bodies = Vec::new();
        for (objid, body) in objects {
            header.push_str(&format!("{} {} ", objid, bodies.len()));
            bodies.extend_from_slice(body.as_bytes());
            bodies.push(b' ');
        }
        let first = header.len();
        let mut data = header.into_bytes();
        data.extend_from_slice(&bodies);
        let dict = format!(
            "/Type /ObjStm /N {} /First {} /Filter /FlateDecode",
            objects.len(),
            first
        );
        self.stream(container, &dict, &flate(&data));
        for (index, (objid, _)) in objects.iter().enumerate() {
            self.pending.insert(
                *objid,
                Slot::Packed {
                    container,
                    index: index as u32,
                },
            );
        }
        self
    }

    fn runs(ids: &[u32]) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for &id in ids {
            match runs.last_mut() {
                Some((start, count)) if *start + *count == id => *count += 1,
                _ => runs.push((id, 1)),
            }
        }
        runs
    }

    /// Emit a classic `xref` table, trailer and `startxref`. Returns the
    /// table's offset.
    pub fn classic_section(&mut self, trailer: &str) -> usize {
        let pos = self.buf.len();
        let mut entries: BTreeMap<u32, String> = BTreeMap::new();
        if self.sections == 0 {
            entries.insert(0, "0000000000 65535 f \n".to_string());
        }
        for (&objid, slot) in &self.pending {
            if let Slot::File { offset, genno } = slot {
                entries.insert(objid, format!("{:010} {:05} n \n", offset, genno));
            }
        }
        let ids: Vec<u32> = entries.keys().copied().collect();
        self.buf.extend_from_slice(b"xref\n");
        for (start, count) in Self::runs(&ids) {
            write!(self.buf, "{} {}\n", start, count).unwrap();
            for id in start..start + count {
                self.buf.extend_from_slice(entries[&id].as_bytes());
            }
        }
        write!(self.buf, "trailer\n<< {} >>\n", trailer).unwrap();
        self.finish_section(pos)
    }

    /// Emit a cross-reference stream as object `objid`, with `trailer`
    /// entries in its dictionary. Returns the stream's offset.
    pub fn stream_section(&mut self, objid: u32, trailer: &str) -> usize {
        let pos = self.buf.len();
        let mut rows: BTreeMap<u32, [u8; 7]> = BTreeMap::new();
        if self.sections == 0 {
            rows.insert(0, [0, 0, 0, 0, 0, 0xff, 0xff]);
        }
        let mut slots: Vec<(u32, Slot)> = self.pending.iter().map(|(k, v)| (*k, *v)).collect();
        slots.push((objid, Slot::File { offset: pos, genno: 0 }));
        for (id, slot) in slots {
            let row = match slot {
                Slot::File { offset, genno } => {
                    let o = (offset as u32).to_be_bytes();
                    let g = genno.to_be_bytes();
                    [1, o[0], o[1], o[2], o[3], g[0], g[1]]
                }
                Slot::Packed { container, index } => {
                    let c = container.to_be_bytes();
                    let i = (index as u16).to_be_bytes();
                    [2, c[0], c[1], c[2], c[3], i[0], i[1]]
                }
            };
            rows.insert(id, row);
        }
        let ids: Vec<u32> = rows.keys().copied().collect();
        let index: Vec<String> = Self::runs(&ids)
            .iter()
            .map(|(s, c)| format!("{} {}", s, c))
            .collect();
        let data: Vec<u8> = rows.values().flatten().copied().collect();
        let dict = format!(
            "/Type /XRef /W [1 4 2] /Index [{}] /Filter /FlateDecode {}",
            index.join(" "),
            trailer
        );
        self.stream(objid, &dict, &flate(&data));
        self.pending.clear();
        self.finish_section(pos)
    }

    fn finish_section(&mut self, pos: usize) -> usize {
        write!(self.buf, "startxref\n{}\n%%EOF\n", pos).unwrap();
        self.pending.clear();
        self.sections += 1;
        pos
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

/// A one-revision document: catalog 1, pages 2, info 3.
pub fn simple_pdf() -> Vec<u8> {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .obj(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .obj(3, "<< /Title (Folio test) /Producer (builder) >>");
    b.classic_section("/Size 4 /Root 1 0 R /Info 3 0 R");
    b.build()
}
