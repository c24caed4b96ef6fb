// src/handlers/encrypt.rs

use crate::handlers::Handler;
use crate::node::Node;
use crate::package::{Package, PackageType};

/// Whether the handler encrypts outgoing or decrypts incoming payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

/// Substitution-ciphers the text payload of data packages with rot13.
///
/// A toy by construction: the point is the two distinct pipeline
/// positions (encrypt before the network output, decrypt after the
/// network input), not the cipher itself. Always passes the package on.
pub struct EncryptHandler {
    mode: CipherMode,
}

impl EncryptHandler {
    pub fn new(mode: CipherMode) -> Self {
        Self { mode }
    }
}

impl Handler for EncryptHandler {
    fn consume(&self, package: &mut Package, _node: &Node) -> bool {
        if package.package_type() == PackageType::Data {
            let payload = package.payload_str();
            if !payload.is_empty() {
                // rot13 is its own inverse; both modes apply the same
                // substitution.
                let changed = match self.mode {
                    CipherMode::Encrypt | CipherMode::Decrypt => rot13(payload),
                };
                package.set_payload_str(changed);
            }
        }
        false
    }
}

fn rot13(source: &str) -> String {
    source
        .chars()
        .map(|c| match c {
            'A'..='M' | 'a'..='m' => ((c as u8) + 13) as char,
            'N'..='Z' | 'n'..='z' => ((c as u8) - 13) as char,
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rot13_is_its_own_inverse() {
        let plain = "Attack at Dawn! 123";
        let cipher = rot13(plain);
        assert_eq!(cipher, "Nggnpx ng Qnja! 123");
        assert_eq!(rot13(&cipher), plain);
    }
}
