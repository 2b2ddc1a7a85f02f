use crate::types::{Signature, VoterId};
use ed25519_dalek::Signer;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;

pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let sk = SigningKey::generate(&mut OsRng);
    let vk = sk.verifying_key();
    (sk, vk)
}

pub fn voter_id(vk: &VerifyingKey) -> VoterId {
    VoterId(vk.to_bytes())
}

pub fn sign(sk: &SigningKey, msg: &[u8]) -> Signature {
    Signature(sk.sign(msg).to_bytes())
}

pub fn verify(msg: &[u8], sig: &Signature, id: &VoterId) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(&id.0) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig.0);
    vk.verify_strict(msg, &sig).is_ok()
}
