//! Wire codec for vote, justification, commit and catch-up payloads.
//!
//! The layouts here are interoperability-critical: field order and the vote
//! discriminants (Prevote = 0, Precommit = 1, PrimaryPropose = 2) must stay
//! bit-for-bit stable across implementations.

use crate::types::{
    block::{BlockHeader, BlockInfo},
    hash::Hash,
    vote::{Signature, SignedMessage, Vote, VoteMessage},
    voter::VoterId,
    RoundNumber, VoterSetId,
};
use crate::commit::{CatchUpRequest, CatchUpResponse, CommitMessage, CompactCommit};
use crate::justification::GrandpaJustification;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected eof")]
    Eof,
    #[error("invalid data: {0}")]
    Invalid(&'static str),
}

pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    pub fn put_bytes32(&mut self, v: &[u8; 32]) {
        self.buf.extend_from_slice(v);
    }
    pub fn put_bytes64(&mut self, v: &[u8; 64]) {
        self.buf.extend_from_slice(v);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Eof);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn finish(&self) -> Result<(), CodecError> {
        if self.has_more() {
            return Err(CodecError::Invalid("trailing bytes"));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
    pub fn get_bytes32(&mut self) -> Result<[u8; 32], CodecError> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }
    pub fn get_bytes64(&mut self) -> Result<[u8; 64], CodecError> {
        let b = self.take(64)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(b);
        Ok(out)
    }
}

// ---- BlockInfo ----

pub fn put_block_info(e: &mut Encoder, b: &BlockInfo) {
    e.put_u64(b.number);
    e.put_bytes32(&b.hash.0);
}

pub fn get_block_info(d: &mut Decoder<'_>) -> Result<BlockInfo, CodecError> {
    Ok(BlockInfo {
        number: d.get_u64()?,
        hash: Hash(d.get_bytes32()?),
    })
}

// ---- Vote ----

fn vote_tag(v: &Vote) -> u8 {
    match v {
        Vote::Prevote(_) => 0,
        Vote::Precommit(_) => 1,
        Vote::PrimaryPropose(_) => 2,
    }
}

pub fn put_vote(e: &mut Encoder, v: &Vote) {
    e.put_u8(vote_tag(v));
    put_block_info(e, &v.block_info());
}

pub fn get_vote(d: &mut Decoder<'_>) -> Result<Vote, CodecError> {
    let tag = d.get_u8()?;
    let info = get_block_info(d)?;
    match tag {
        0 => Ok(Vote::Prevote(info)),
        1 => Ok(Vote::Precommit(info)),
        2 => Ok(Vote::PrimaryPropose(info)),
        _ => Err(CodecError::Invalid("unknown vote tag")),
    }
}

// ---- SignedMessage ----

pub fn put_signed_message(e: &mut Encoder, m: &SignedMessage) {
    put_vote(e, &m.vote);
    e.put_bytes64(&m.signature.0);
    e.put_bytes32(&m.id.0);
}

pub fn get_signed_message(d: &mut Decoder<'_>) -> Result<SignedMessage, CodecError> {
    Ok(SignedMessage {
        vote: get_vote(d)?,
        signature: Signature(d.get_bytes64()?),
        id: VoterId(d.get_bytes32()?),
    })
}

fn put_signed_messages(e: &mut Encoder, msgs: &[SignedMessage]) {
    e.put_u32(msgs.len() as u32);
    for m in msgs {
        put_signed_message(e, m);
    }
}

fn get_signed_messages(d: &mut Decoder<'_>) -> Result<Vec<SignedMessage>, CodecError> {
    let n = d.get_u32()? as usize;
    let mut out = Vec::with_capacity(n.min(1024));
    for _ in 0..n {
        out.push(get_signed_message(d)?);
    }
    Ok(out)
}

/// The payload a voter actually signs: round number, then voter-set id,
/// then the vote, in that fixed order. Binding the round and set version
/// into the signature prevents replaying a vote into another round or
/// under another authority set.
pub fn signable_payload(round: RoundNumber, set_id: VoterSetId, vote: &Vote) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u64(round);
    e.put_u64(set_id);
    put_vote(&mut e, vote);
    e.into_bytes()
}

// ---- BlockHeader ----

pub fn encode_header(h: &BlockHeader) -> Vec<u8> {
    let mut e = Encoder::new();
    put_header(&mut e, h);
    e.into_bytes()
}

pub fn put_header(e: &mut Encoder, h: &BlockHeader) {
    e.put_bytes32(&h.parent_hash.0);
    e.put_u64(h.number);
    e.put_bytes32(&h.state_root.0);
}

pub fn get_header(d: &mut Decoder<'_>) -> Result<BlockHeader, CodecError> {
    Ok(BlockHeader {
        parent_hash: Hash(d.get_bytes32()?),
        number: d.get_u64()?,
        state_root: Hash(d.get_bytes32()?),
    })
}

// ---- VoteMessage ----

pub fn encode_vote_message(m: &VoteMessage) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u64(m.round_number);
    e.put_u64(m.set_id);
    put_signed_message(&mut e, &m.message);
    e.into_bytes()
}

pub fn decode_vote_message(data: &[u8]) -> Result<VoteMessage, CodecError> {
    let mut d = Decoder::new(data);
    let msg = VoteMessage {
        round_number: d.get_u64()?,
        set_id: d.get_u64()?,
        message: get_signed_message(&mut d)?,
    };
    d.finish()?;
    Ok(msg)
}

// ---- GrandpaJustification ----

pub fn encode_justification(j: &GrandpaJustification) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u64(j.round_number);
    put_block_info(&mut e, &j.block_info);
    put_signed_messages(&mut e, &j.items);
    e.put_u32(j.votes_ancestries.len() as u32);
    for h in &j.votes_ancestries {
        put_header(&mut e, h);
    }
    e.into_bytes()
}

pub fn decode_justification(data: &[u8]) -> Result<GrandpaJustification, CodecError> {
    let mut d = Decoder::new(data);
    let round_number = d.get_u64()?;
    let block_info = get_block_info(&mut d)?;
    let items = get_signed_messages(&mut d)?;

    // Older persisted justifications end right after the precommits. Treat
    // a missing ancestry field as empty rather than failing the decode.
    let votes_ancestries = if d.has_more() {
        let n = d.get_u32()? as usize;
        let mut out = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            out.push(get_header(&mut d)?);
        }
        out
    } else {
        tracing::warn!(round = round_number, "justification missing ancestry field, assuming empty");
        Vec::new()
    };
    d.finish()?;

    Ok(GrandpaJustification {
        round_number,
        block_info,
        items,
        votes_ancestries,
    })
}

// ---- CompactCommit / CommitMessage ----

pub fn encode_commit_message(m: &CommitMessage) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u64(m.round_number);
    let c = &m.compact;
    e.put_bytes32(&c.target_hash.0);
    e.put_u64(c.target_number);
    e.put_u32(c.precommits.len() as u32);
    for t in &c.precommits {
        put_block_info(&mut e, t);
    }
    e.put_u32(c.auth_data.len() as u32);
    for (sig, id) in &c.auth_data {
        e.put_bytes64(&sig.0);
        e.put_bytes32(&id.0);
    }
    e.into_bytes()
}

pub fn decode_commit_message(data: &[u8]) -> Result<CommitMessage, CodecError> {
    let mut d = Decoder::new(data);
    let round_number = d.get_u64()?;
    let target_hash = Hash(d.get_bytes32()?);
    let target_number = d.get_u64()?;

    let n = d.get_u32()? as usize;
    let mut precommits = Vec::with_capacity(n.min(1024));
    for _ in 0..n {
        precommits.push(get_block_info(&mut d)?);
    }

    let n = d.get_u32()? as usize;
    let mut auth_data = Vec::with_capacity(n.min(1024));
    for _ in 0..n {
        let sig = Signature(d.get_bytes64()?);
        let id = VoterId(d.get_bytes32()?);
        auth_data.push((sig, id));
    }
    d.finish()?;

    Ok(CommitMessage {
        round_number,
        compact: CompactCommit {
            target_hash,
            target_number,
            precommits,
            auth_data,
        },
    })
}

// ---- Catch-up ----

pub fn encode_catch_up_request(r: &CatchUpRequest) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u64(r.round_number);
    e.put_u64(r.set_id);
    e.into_bytes()
}

pub fn decode_catch_up_request(data: &[u8]) -> Result<CatchUpRequest, CodecError> {
    let mut d = Decoder::new(data);
    let r = CatchUpRequest {
        round_number: d.get_u64()?,
        set_id: d.get_u64()?,
    };
    d.finish()?;
    Ok(r)
}

pub fn encode_catch_up_response(r: &CatchUpResponse) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u64(r.set_id);
    e.put_u64(r.round_number);
    put_block_info(&mut e, &r.base);
    put_signed_messages(&mut e, &r.prevotes);
    put_signed_messages(&mut e, &r.precommits);
    e.into_bytes()
}

pub fn decode_catch_up_response(data: &[u8]) -> Result<CatchUpResponse, CodecError> {
    let mut d = Decoder::new(data);
    let r = CatchUpResponse {
        set_id: d.get_u64()?,
        round_number: d.get_u64()?,
        base: get_block_info(&mut d)?,
        prevotes: get_signed_messages(&mut d)?,
        precommits: get_signed_messages(&mut d)?,
    };
    d.finish()?;
    Ok(r)
}
