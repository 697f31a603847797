//! CCTP V2 message codec.
//!
//! Layout follows `MessageV2.sol` / `BurnMessageV2.sol`. All integers are
//! big-endian; addresses are left-padded to 32 bytes.
//!
//! Header:
//!
//! | offset | size | field                       |
//! |--------|------|-----------------------------|
//! | 0      | 4    | version                     |
//! | 4      | 4    | source domain               |
//! | 8      | 4    | destination domain          |
//! | 12     | 32   | nonce                       |
//! | 44     | 32   | sender                      |
//! | 76     | 32   | recipient                   |
//! | 108    | 32   | destination caller          |
//! | 140    | 4    | min finality threshold      |
//! | 144    | 4    | finality threshold executed |
//! | 148    | ...  | body                        |
//!
//! Burn body (offsets relative to the body):
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 4    | version          |
//! | 4      | 32   | burn token       |
//! | 36     | 32   | mint recipient   |
//! | 68     | 32   | amount           |
//! | 100    | 32   | message sender   |
//! | 132    | 32   | max fee          |
//! | 164    | 32   | fee executed     |
//! | 196    | 32   | expiration block |
//! | 228    | ...  | hook data        |

use alloy::primitives::{Address, B256, Bytes, U256};

use crate::registry::Domain;

pub const MESSAGE_VERSION: u32 = 1;
pub const BURN_MESSAGE_VERSION: u32 = 1;

const SOURCE_DOMAIN_INDEX: usize = 4;
const DESTINATION_DOMAIN_INDEX: usize = 8;
const NONCE_INDEX: usize = 12;
const SENDER_INDEX: usize = 44;
const RECIPIENT_INDEX: usize = 76;
const DESTINATION_CALLER_INDEX: usize = 108;
const MIN_FINALITY_INDEX: usize = 140;
const FINALITY_EXECUTED_INDEX: usize = 144;
const BODY_INDEX: usize = 148;

const BURN_TOKEN_INDEX: usize = 4;
const MINT_RECIPIENT_INDEX: usize = 36;
const AMOUNT_INDEX: usize = 68;
const MESSAGE_SENDER_INDEX: usize = 100;
const MAX_FEE_INDEX: usize = 132;
const FEE_EXECUTED_INDEX: usize = 164;
const EXPIRATION_BLOCK_INDEX: usize = 196;
const HOOK_DATA_INDEX: usize = 228;

/// Shortest valid burn message: full header plus burn body without hook data.
pub const MIN_BURN_MESSAGE_LENGTH: usize = BODY_INDEX + HOOK_DATA_INDEX;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("CCTP message too short: got {length} bytes, need at least {required}")]
    TooShort { length: usize, required: usize },
}

/// Decoded CCTP V2 message carrying a burn body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CctpMessage {
    pub version: u32,
    pub source_domain: Domain,
    pub destination_domain: Domain,
    /// Zero in the `MessageSent` event; filled in by the attestation service.
    pub nonce: B256,
    pub sender: B256,
    pub recipient: B256,
    pub destination_caller: B256,
    pub min_finality_threshold: u32,
    pub finality_threshold_executed: u32,
    pub body: BurnMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnMessage {
    pub version: u32,
    pub burn_token: B256,
    pub mint_recipient: B256,
    pub amount: U256,
    pub message_sender: B256,
    pub max_fee: U256,
    pub fee_executed: U256,
    pub expiration_block: U256,
    pub hook_data: Bytes,
}

impl CctpMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() < MIN_BURN_MESSAGE_LENGTH {
            return Err(MessageError::TooShort {
                length: bytes.len(),
                required: MIN_BURN_MESSAGE_LENGTH,
            });
        }

        let body = &bytes[BODY_INDEX..];

        Ok(Self {
            version: read_u32(bytes, 0),
            source_domain: Domain(read_u32(bytes, SOURCE_DOMAIN_INDEX)),
            destination_domain: Domain(read_u32(bytes, DESTINATION_DOMAIN_INDEX)),
            nonce: read_word(bytes, NONCE_INDEX),
            sender: read_word(bytes, SENDER_INDEX),
            recipient: read_word(bytes, RECIPIENT_INDEX),
            destination_caller: read_word(bytes, DESTINATION_CALLER_INDEX),
            min_finality_threshold: read_u32(bytes, MIN_FINALITY_INDEX),
            finality_threshold_executed: read_u32(bytes, FINALITY_EXECUTED_INDEX),
            body: BurnMessage {
                version: read_u32(body, 0),
                burn_token: read_word(body, BURN_TOKEN_INDEX),
                mint_recipient: read_word(body, MINT_RECIPIENT_INDEX),
                amount: read_u256(body, AMOUNT_INDEX),
                message_sender: read_word(body, MESSAGE_SENDER_INDEX),
                max_fee: read_u256(body, MAX_FEE_INDEX),
                fee_executed: read_u256(body, FEE_EXECUTED_INDEX),
                expiration_block: read_u256(body, EXPIRATION_BLOCK_INDEX),
                hook_data: Bytes::copy_from_slice(&body[HOOK_DATA_INDEX..]),
            },
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(MIN_BURN_MESSAGE_LENGTH + self.body.hook_data.len());

        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.source_domain.0.to_be_bytes());
        out.extend_from_slice(&self.destination_domain.0.to_be_bytes());
        out.extend_from_slice(self.nonce.as_slice());
        out.extend_from_slice(self.sender.as_slice());
        out.extend_from_slice(self.recipient.as_slice());
        out.extend_from_slice(self.destination_caller.as_slice());
        out.extend_from_slice(&self.min_finality_threshold.to_be_bytes());
        out.extend_from_slice(&self.finality_threshold_executed.to_be_bytes());

        let body = &self.body;
        out.extend_from_slice(&body.version.to_be_bytes());
        out.extend_from_slice(body.burn_token.as_slice());
        out.extend_from_slice(body.mint_recipient.as_slice());
        out.extend_from_slice(&body.amount.to_be_bytes::<32>());
        out.extend_from_slice(body.message_sender.as_slice());
        out.extend_from_slice(&body.max_fee.to_be_bytes::<32>());
        out.extend_from_slice(&body.fee_executed.to_be_bytes::<32>());
        out.extend_from_slice(&body.expiration_block.to_be_bytes::<32>());
        out.extend_from_slice(&body.hook_data);

        Bytes::from(out)
    }

    /// The EVM address encoded in the mint recipient, if it is a
    /// left-padded 20-byte address.
    pub fn mint_recipient_address(&self) -> Option<Address> {
        word_to_address(self.body.mint_recipient)
    }

    pub fn has_nonce(&self) -> bool {
        !self.nonce.is_zero()
    }
}

/// Left-pads an address to the bytes32 form CCTP uses for recipients.
pub fn address_to_word(address: Address) -> B256 {
    B256::left_padding_from(address.as_slice())
}

pub fn word_to_address(word: B256) -> Option<Address> {
    word[..12]
        .iter()
        .all(|&byte| byte == 0)
        .then(|| Address::from_word(word))
}

/// Reads the nonce of a V2 message without decoding the body.
pub fn extract_nonce(message: &[u8]) -> Result<B256, MessageError> {
    let required = NONCE_INDEX + 32;
    if message.len() < required {
        return Err(MessageError::TooShort {
            length: message.len(),
            required,
        });
    }

    Ok(read_word(message, NONCE_INDEX))
}

// Callers validate length up front.
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_word(bytes: &[u8], offset: usize) -> B256 {
    B256::from_slice(&bytes[offset..offset + 32])
}

fn read_u256(bytes: &[u8], offset: usize) -> U256 {
    U256::from_be_slice(&bytes[offset..offset + 32])
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256};

    use super::*;

    fn sample() -> CctpMessage {
        CctpMessage {
            version: MESSAGE_VERSION,
            source_domain: Domain(0),
            destination_domain: Domain(6),
            nonce: B256::ZERO,
            sender: address_to_word(address!("0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d")),
            recipient: address_to_word(address!("0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d")),
            destination_caller: B256::ZERO,
            min_finality_threshold: 2000,
            finality_threshold_executed: 0,
            body: BurnMessage {
                version: BURN_MESSAGE_VERSION,
                burn_token: address_to_word(address!(
                    "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
                )),
                mint_recipient: address_to_word(address!(
                    "0x1111111111111111111111111111111111111111"
                )),
                amount: U256::from(1_000_000),
                message_sender: address_to_word(address!(
                    "0x2222222222222222222222222222222222222222"
                )),
                max_fee: U256::ZERO,
                fee_executed: U256::ZERO,
                expiration_block: U256::ZERO,
                hook_data: Bytes::new(),
            },
        }
    }

    #[test]
    fn encoded_fields_land_at_documented_offsets() {
        let mut message = sample();
        message.nonce =
            b256!("0x00000000000000000000000000000000000000000000000000000000000000ff");

        let bytes = message.encode();

        assert_eq!(bytes.len(), MIN_BURN_MESSAGE_LENGTH);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 6]);
        assert_eq!(bytes[43], 0xff);
        assert_eq!(&bytes[140..144], &2000u32.to_be_bytes());
        assert_eq!(&bytes[148..152], &[0, 0, 0, 1]);
        assert_eq!(
            U256::from_be_slice(&bytes[148 + 68..148 + 100]),
            U256::from(1_000_000)
        );
    }

    #[test]
    fn decode_reads_back_encoded_message_with_hook_data() {
        let mut message = sample();
        message.body.hook_data = Bytes::from_static(b"hook");
        message.body.fee_executed = U256::from(100);

        let decoded = CctpMessage::decode(&message.encode()).unwrap();

        assert_eq!(decoded, message);
    }

    #[test]
    fn decode_rejects_truncated_message() {
        let bytes = sample().encode();

        let error = CctpMessage::decode(&bytes[..200]).unwrap_err();

        assert_eq!(
            error,
            MessageError::TooShort {
                length: 200,
                required: MIN_BURN_MESSAGE_LENGTH,
            }
        );
    }

    #[test]
    fn mint_recipient_decodes_to_address() {
        assert_eq!(
            sample().mint_recipient_address(),
            Some(address!("0x1111111111111111111111111111111111111111"))
        );
    }

    #[test]
    fn non_evm_recipient_has_no_address() {
        let word = b256!("0x0101010101010101010101010101010101010101010101010101010101010101");

        assert_eq!(word_to_address(word), None);
    }

    #[test]
    fn message_sent_placeholder_has_no_nonce() {
        assert!(!sample().has_nonce());
    }

    #[test]
    fn extract_nonce_reads_bytes_12_to_44() {
        let mut message = vec![0u8; 44];
        message[12..44].copy_from_slice(&[0xab; 32]);

        assert_eq!(extract_nonce(&message).unwrap(), B256::repeat_byte(0xab));
        assert_eq!(
            extract_nonce(&message[..43]).unwrap_err(),
            MessageError::TooShort {
                length: 43,
                required: 44,
            }
        );
    }
}
