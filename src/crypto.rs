//! AES-128-CCM sealing of BTHome payloads.
//!
//! Both BTHome generations use a 4-byte tag and a nonce built from the
//! device address, the service UUID and the packet counter. They differ in
//! the nonce length and the associated data:
//!
//! | scheme | nonce                                           | aad    |
//! |--------|-------------------------------------------------|--------|
//! | v2     | MAC(6) + `D2 FC` + device info(1) + counter(4) | none   |
//! | v1     | MAC(6) + `1E 18` + counter(4)                  | `0x11` |

use aes::Aes128;
use ccm::Ccm;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U4, U12, U13};
use log::trace;

use crate::device::{BindKey, MacAddress};
use crate::error::{Error, Result};

pub const TAG_LEN: usize = 4;
pub const COUNTER_LEN: usize = 4;

type CcmV2 = Ccm<Aes128, U4, U13>;
type CcmV1 = Ccm<Aes128, U4, U12>;

const V2_UUID: [u8; 2] = [0xD2, 0xFC];
const V1_UUID: [u8; 2] = [0x1E, 0x18];
const V1_AAD: [u8; 1] = [0x11];

/// Which nonce layout a packet was sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceScheme {
    V2 { device_info: u8 },
    V1,
}

impl NonceScheme {
    /// Longest message the CCM length field can encode: 15 minus the nonce
    /// length gives its width in bytes.
    fn max_message_len(self) -> usize {
        match self {
            NonceScheme::V2 { .. } => 0xFFFF,
            NonceScheme::V1 => 0xFF_FFFF,
        }
    }
}

fn v2_nonce(address: MacAddress, device_info: u8, counter: u32) -> [u8; 13] {
    let mut nonce = [0u8; 13];
    nonce[..6].copy_from_slice(&address.octets());
    nonce[6..8].copy_from_slice(&V2_UUID);
    nonce[8] = device_info;
    nonce[9..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn v1_nonce(address: MacAddress, counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..6].copy_from_slice(&address.octets());
    nonce[6..8].copy_from_slice(&V1_UUID);
    nonce[8..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Verifies `tag` over `ciphertext` and returns the plaintext.
///
/// Nothing derived from the ciphertext is returned unless the tag verifies;
/// the comparison itself is constant-time inside `ccm`.
pub fn decrypt(
    key: &BindKey,
    address: MacAddress,
    scheme: NonceScheme,
    counter: u32,
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>> {
    let key = GenericArray::from_slice(key.as_bytes());
    let tag = GenericArray::from_slice(tag);
    let mut buffer = ciphertext.to_vec();

    let verified = match scheme {
        NonceScheme::V2 { device_info } => {
            let nonce = v2_nonce(address, device_info, counter);
            CcmV2::new(key).decrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &[],
                &mut buffer,
                tag,
            )
        }
        NonceScheme::V1 => {
            let nonce = v1_nonce(address, counter);
            CcmV1::new(key).decrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &V1_AAD,
                &mut buffer,
                tag,
            )
        }
    };

    match verified {
        Ok(()) => {
            trace!("{address}: decrypted {}", hex::encode(&buffer));
            Ok(buffer)
        }
        Err(_) => Err(Error::AuthenticationFailed),
    }
}

/// Encrypts `plaintext` the way a sensor does, returning ciphertext and tag.
pub fn seal(
    key: &BindKey,
    address: MacAddress,
    scheme: NonceScheme,
    counter: u32,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let max = scheme.max_message_len();
    if plaintext.len() > max {
        return Err(Error::PayloadTooLong { len: plaintext.len(), max });
    }

    let key = GenericArray::from_slice(key.as_bytes());
    let mut buffer = plaintext.to_vec();

    let sealed = match scheme {
        NonceScheme::V2 { device_info } => {
            let nonce = v2_nonce(address, device_info, counter);
            CcmV2::new(key).encrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &[],
                &mut buffer,
            )
        }
        NonceScheme::V1 => {
            let nonce = v1_nonce(address, counter);
            CcmV1::new(key).encrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &V1_AAD,
                &mut buffer,
            )
        }
    }
    .map_err(|_| Error::PayloadTooLong { len: plaintext.len(), max })?;

    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&sealed);
    Ok((buffer, tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: MacAddress = MacAddress([0x54, 0x48, 0xE6, 0x8F, 0x80, 0xA5]);

    fn key() -> BindKey {
        "231d39c1d7cc1ab1aee224cd096db932".parse().unwrap()
    }

    #[test]
    fn nonce_layouts() {
        let v2 = v2_nonce(ADDRESS, 0x41, 0x0011_2233);
        assert_eq!(
            v2,
            [0x54, 0x48, 0xE6, 0x8F, 0x80, 0xA5, 0xD2, 0xFC, 0x41, 0x33, 0x22, 0x11, 0x00]
        );
        let v1 = v1_nonce(ADDRESS, 1);
        assert_eq!(
            v1,
            [0x54, 0x48, 0xE6, 0x8F, 0x80, 0xA5, 0x1E, 0x18, 0x01, 0x00, 0x00, 0x00]
        );
    }

    // Published BTHome v2 example: device info 0x41, counter 0x33221100.
    #[test]
    fn bthome_v2_reference_packet() {
        let ciphertext = hex::decode("a47266c95f73").unwrap();
        let tag = [0x78, 0x23, 0x72, 0x14];
        let scheme = NonceScheme::V2 { device_info: 0x41 };
        let opened = decrypt(&key(), ADDRESS, scheme, 0x3322_1100, &ciphertext, &tag).unwrap();
        assert_eq!(opened, [0x02, 0xCA, 0x09, 0x03, 0xBF, 0x13]);

        let (sealed, sealed_tag) = seal(&key(), ADDRESS, scheme, 0x3322_1100, &opened).unwrap();
        assert_eq!(sealed, ciphertext);
        assert_eq!(sealed_tag, tag);
    }

    #[test]
    fn oversized_message_is_refused() {
        let scheme = NonceScheme::V2 { device_info: 0x41 };
        assert_eq!(
            seal(&key(), ADDRESS, scheme, 1, &vec![0; 0x1_0000]),
            Err(Error::PayloadTooLong {
                len: 0x1_0000,
                max: 0xFFFF
            })
        );
        assert!(seal(&key(), ADDRESS, NonceScheme::V1, 1, &vec![0; 0x1_0000]).is_ok());
    }

    #[test]
    fn round_trip_both_schemes() {
        let plaintext = [0x02, 0x34, 0x08, 0x03, 0x14, 0x0F];
        for scheme in [NonceScheme::V2 { device_info: 0x41 }, NonceScheme::V1] {
            let (ciphertext, tag) = seal(&key(), ADDRESS, scheme, 7, &plaintext).unwrap();
            assert_ne!(ciphertext, plaintext);
            let opened = decrypt(&key(), ADDRESS, scheme, 7, &ciphertext, &tag).unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn every_bit_flip_fails() {
        let scheme = NonceScheme::V2 { device_info: 0x41 };
        let (ciphertext, tag) = seal(&key(), ADDRESS, scheme, 7, &[0x01, 0x5D, 0x02, 0x34, 0x08]).unwrap();

        for byte in 0..ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = ciphertext.clone();
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    decrypt(&key(), ADDRESS, scheme, 7, &tampered, &tag),
                    Err(Error::AuthenticationFailed)
                );
            }
        }
        for byte in 0..TAG_LEN {
            for bit in 0..8 {
                let mut tampered = tag;
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    decrypt(&key(), ADDRESS, scheme, 7, &ciphertext, &tampered),
                    Err(Error::AuthenticationFailed)
                );
            }
        }
    }

    #[test]
    fn nonce_inputs_are_authenticated() {
        let scheme = NonceScheme::V2 { device_info: 0x41 };
        let (ciphertext, tag) = seal(&key(), ADDRESS, scheme, 7, &[0x01, 0x5D]).unwrap();

        let other = MacAddress([0x54, 0x48, 0xE6, 0x8F, 0x80, 0xA6]);
        assert!(decrypt(&key(), other, scheme, 7, &ciphertext, &tag).is_err());
        assert!(decrypt(&key(), ADDRESS, scheme, 8, &ciphertext, &tag).is_err());
        assert!(decrypt(&key(), ADDRESS, NonceScheme::V2 { device_info: 0x45 }, 7, &ciphertext, &tag).is_err());

        let wrong: BindKey = "00000000000000000000000000000000".parse().unwrap();
        assert_eq!(
            decrypt(&wrong, ADDRESS, scheme, 7, &ciphertext, &tag),
            Err(Error::AuthenticationFailed)
        );
    }
}
