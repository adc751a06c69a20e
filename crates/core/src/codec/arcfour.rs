//! RC4 stream cipher.

/// RC4 keystream state. Keys longer than 256 bytes are truncated and an
/// empty key behaves as a single zero byte.
pub struct Arcfour {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Arcfour {
    pub fn new(key: &[u8]) -> Self {
        let key: &[u8] = match key.len() {
            0 => &[0],
            1..=256 => key,
            _ => &key[..256],
        };

        let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);

        // KSA
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Self { state, i: 0, j: 0 }
    }

    /// Encrypt or decrypt `data`; the cipher is symmetric.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|byte| byte ^ self.keystream_byte()).collect()
    }

    fn keystream_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);

        let idx = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
        self.state[idx as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keystream() {
        // Classic "Key" / "Plaintext" vector.
        let out = Arcfour::new(b"Key").process(b"Plaintext");
        assert_eq!(out, [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);
    }

    #[test]
    fn symmetric() {
        let ct = Arcfour::new(b"secret").process(b"attack at dawn");
        assert_eq!(Arcfour::new(b"secret").process(&ct), b"attack at dawn");
    }
}
