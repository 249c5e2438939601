//! Legacy (EIP-155) transaction encoding and signing.
//!
//! Just enough RLP to encode a transaction and derive a contract address.

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use super::DeployError;

pub type Address = [u8; 20];

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// `0x`-prefixed lowercase hex of an address.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

// ─── RLP ─────────────────────────────────────────────────────────────────────

fn rlp_length_prefix(out: &mut Vec<u8>, len: usize, short_base: u8, long_base: u8) {
    if len <= 55 {
        out.push(short_base + len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        out.push(long_base + (be.len() - skip) as u8);
        out.extend_from_slice(&be[skip..]);
    }
}

fn rlp_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        rlp_length_prefix(out, bytes.len(), 0x80, 0xb7);
        out.extend_from_slice(bytes);
    }
}

/// Big-endian integer with leading zero bytes removed (zero is empty).
fn rlp_scalar(out: &mut Vec<u8>, be: &[u8]) {
    let skip = be.iter().take_while(|b| **b == 0).count();
    rlp_bytes(out, &be[skip..]);
}

fn rlp_uint(out: &mut Vec<u8>, value: u128) {
    rlp_scalar(out, &value.to_be_bytes());
}

fn rlp_list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    rlp_length_prefix(&mut out, payload.len(), 0xc0, 0xf7);
    out.extend_from_slice(payload);
    out
}

/// Address of a contract created by `sender` at `nonce`.
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    let mut payload = Vec::with_capacity(30);
    rlp_bytes(&mut payload, sender);
    rlp_uint(&mut payload, nonce as u128);
    let hash = keccak256(&rlp_list(&payload));
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// A pre-EIP-1559 transaction with EIP-155 replay protection.
/// `to: None` makes it a contract creation.
#[derive(Debug, Clone)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_uint(out, self.nonce as u128);
        rlp_uint(out, self.gas_price);
        rlp_uint(out, self.gas_limit as u128);
        match &self.to {
            Some(to) => rlp_bytes(out, to),
            None => rlp_bytes(out, &[]),
        }
        rlp_uint(out, self.value);
        rlp_bytes(out, &self.data);
    }

    /// RLP of `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        rlp_uint(&mut payload, self.chain_id as u128);
        rlp_uint(&mut payload, 0);
        rlp_uint(&mut payload, 0);
        rlp_list(&payload)
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    fn encode_signed(&self, v: u64, r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        rlp_uint(&mut payload, v as u128);
        rlp_scalar(&mut payload, r);
        rlp_scalar(&mut payload, s);
        rlp_list(&payload)
    }
}

/// The deployer account's secp256k1 key.
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeployError> {
        let key = SigningKey::from_slice(bytes).map_err(|e| DeployError::Key(e.to_string()))?;
        let point = key.verifying_key().to_encoded_point(false);
        // uncompressed SEC1: 0x04 || X || Y
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        Ok(Self { key, address })
    }

    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self, DeployError> {
        let key = key.trim();
        let bytes = hex::decode(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|e| DeployError::Key(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `tx` and return the raw transaction bytes.
    pub fn sign(&self, tx: &LegacyTx) -> Result<Vec<u8>, DeployError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&tx.signing_hash())
            .map_err(|e| DeployError::Signing(e.to_string()))?;
        let v = tx.chain_id * 2 + 35 + u64::from(recovery_id.is_y_odd());
        let rs = signature.to_bytes();
        Ok(tx.encode_signed(v, &rs[..32], &rs[32..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eip155_example() -> LegacyTx {
        LegacyTx {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some([0x35; 20]),
            value: 1_000_000_000_000_000_000,
            data: vec![],
            chain_id: 1,
        }
    }

    fn example_signer() -> Signer {
        Signer::from_hex("0x4646464646464646464646464646464646464646464646464646464646464646").unwrap()
    }

    #[test]
    fn rlp_short_and_long_strings() {
        let mut out = Vec::new();
        rlp_bytes(&mut out, b"dog");
        assert_eq!(out, [0x83, b'd', b'o', b'g']);

        let mut out = Vec::new();
        rlp_bytes(&mut out, &[0x7f]);
        assert_eq!(out, [0x7f]);

        let mut out = Vec::new();
        rlp_bytes(&mut out, &[]);
        assert_eq!(out, [0x80]);

        let long = [0xaau8; 56];
        let mut out = Vec::new();
        rlp_bytes(&mut out, &long);
        assert_eq!(&out[..2], &[0xb8, 56]);
        assert_eq!(out.len(), 58);
    }

    #[test]
    fn rlp_integers() {
        let mut out = Vec::new();
        rlp_uint(&mut out, 0);
        rlp_uint(&mut out, 15);
        rlp_uint(&mut out, 1024);
        assert_eq!(out, [0x80, 0x0f, 0x82, 0x04, 0x00]);
    }

    #[test]
    fn rlp_long_list() {
        let payload = vec![0x01u8; 60];
        let list = rlp_list(&payload);
        assert_eq!(&list[..2], &[0xf8, 60]);
        assert_eq!(list.len(), 62);
    }

    #[test]
    fn eip155_signing_payload() {
        let tx = eip155_example();
        assert_eq!(
            hex::encode(tx.signing_payload()),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn eip155_signed_transaction() {
        let raw = example_signer().sign(&eip155_example()).unwrap();
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn signer_address_from_key() {
        assert_eq!(
            address_hex(&example_signer().address()),
            "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f"
        );
    }

    #[test]
    fn creation_tx_has_empty_to() {
        let mut tx = eip155_example();
        tx.to = None;
        tx.data = vec![0x60, 0x80];
        let payload = tx.signing_payload();
        // nonce, gasPrice, gas, then the empty `to` string
        let to_offset = 1 + 1 + 6 + 3;
        assert_eq!(payload[to_offset], 0x80);
    }

    #[test]
    fn contract_address_from_sender_and_nonce() {
        let sender: Address = hex::decode("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0")
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(
            address_hex(&create_address(&sender, 0)),
            "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"
        );
        assert_eq!(
            address_hex(&create_address(&sender, 1)),
            "0x343c43a37d37dff08ae8c4a11544c718abb4fcf8"
        );
    }

    #[test]
    fn bad_keys_rejected() {
        assert!(matches!(Signer::from_hex("zz"), Err(DeployError::Key(_))));
        assert!(matches!(Signer::from_hex("0x00"), Err(DeployError::Key(_))));
        assert!(matches!(Signer::from_hex(&"00".repeat(32)), Err(DeployError::Key(_))));
    }
}
