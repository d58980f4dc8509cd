// =============================================================================
// CROSSFILL - EVM ABI Encoding
// =============================================================================
//
// Just enough Solidity ABI for the escrow calls and events:
// static words, tuples of static words, and one trailing `bytes`.
//
// Decoding is strict: exact data length, clean address padding, amounts
// that fit u128, and the expected topic0. Anything else is an error,
// never a best-effort guess.
//
// =============================================================================

use std::fmt;

use crate::address::Address;
use crate::amount::{from_word, to_word};
use crate::chain::{ChainFamily, EventKind};
use crate::hashlock::{keccak256, HashLock, Secret};
use crate::immutables::{DstComplement, Immutables};
use crate::order::{Order, OrderHash, OrderSignature, TakerTraits};
use crate::timelocks::TimeLocks;

pub type Word = [u8; 32];

const IMMUTABLES_TUPLE: &str = "(bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256)";
const ORDER_TUPLE: &str = "(uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256)";

/// Words in an encoded `Immutables`
pub const IMMUTABLES_WORDS: usize = 8;
/// Words in a `SrcEscrowCreated` log body
pub const SRC_CREATED_WORDS: usize = 12;
/// Words in a `DstEscrowCreated` log body
pub const DST_CREATED_WORDS: usize = 3;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbiError(pub String);

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ABI error: {}", self.0)
    }
}

impl std::error::Error for AbiError {}

// =============================================================================
// Encoding
// =============================================================================

/// First four bytes of keccak256(signature)
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Head/tail encoder for static words plus trailing dynamic `bytes`
#[derive(Default)]
pub struct AbiEncoder {
    head: Vec<Word>,
    tail: Vec<Vec<u8>>,
    /// Head slots that hold an offset into the tail
    offsets: Vec<(usize, usize)>,
}

impl AbiEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn word(mut self, w: Word) -> Self {
        self.head.push(w);
        self
    }

    pub fn words(mut self, ws: &[Word]) -> Self {
        self.head.extend_from_slice(ws);
        self
    }

    pub fn uint(self, v: u128) -> Self {
        self.word(to_word(v))
    }

    pub fn address(self, a: &Address) -> Self {
        self.word(a.to_word())
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.offsets.push((self.head.len(), self.tail.len()));
        self.head.push([0u8; 32]);
        self.tail.push(data.to_vec());
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let head_len = self.head.len() * 32;
        let mut tail_bytes = Vec::new();
        let mut tail_starts = Vec::with_capacity(self.tail.len());
        for item in &self.tail {
            tail_starts.push(head_len + tail_bytes.len());
            tail_bytes.extend_from_slice(&to_word(item.len() as u128));
            tail_bytes.extend_from_slice(item);
            let pad = (32 - item.len() % 32) % 32;
            tail_bytes.extend(std::iter::repeat(0u8).take(pad));
        }
        for (slot, idx) in &self.offsets {
            self.head[*slot] = to_word(tail_starts[*idx] as u128);
        }

        let mut out = Vec::with_capacity(head_len + tail_bytes.len());
        for w in &self.head {
            out.extend_from_slice(w);
        }
        out.extend_from_slice(&tail_bytes);
        out
    }

    /// Calldata: selector followed by the encoding
    pub fn call(self, signature: &str) -> Vec<u8> {
        let mut out = selector(signature).to_vec();
        out.extend_from_slice(&self.finish());
        out
    }
}

/// Immutables as the 8-word tuple
pub fn encode_immutables(imm: &Immutables) -> Result<[Word; IMMUTABLES_WORDS], AbiError> {
    let time_locks = imm
        .time_locks
        .pack()
        .map_err(|e| AbiError(e.to_string()))?;
    Ok([
        imm.order_hash.0,
        imm.hash_lock.0,
        imm.maker.to_word(),
        imm.taker.to_word(),
        imm.token.to_word(),
        to_word(imm.amount),
        to_word(imm.safety_deposit),
        time_locks,
    ])
}

/// keccak256 of the ABI-encoded immutables (CREATE2 salt)
pub fn immutables_hash(imm: &Immutables) -> Result<Word, AbiError> {
    let words = encode_immutables(imm)?;
    let mut buf = Vec::with_capacity(IMMUTABLES_WORDS * 32);
    for w in &words {
        buf.extend_from_slice(w);
    }
    Ok(keccak256(&buf))
}

fn encode_order(order: &Order) -> [Word; 8] {
    let receiver = match order.receiver {
        Some(r @ Address::Evm(_)) => r.to_word(),
        _ => [0u8; 32],
    };
    [
        order.salt_word(),
        order.maker.to_word(),
        receiver,
        order.maker_asset.to_word(),
        order.taker_asset.to_word(),
        to_word(order.making_amount),
        to_word(order.taking_amount),
        order.maker_traits(),
    ]
}

// -----------------------------------------------------------------------------
// Calls
// -----------------------------------------------------------------------------

/// Resolver.deploySrc(immutables, order, r, vs, amount, takerTraits, args)
pub fn encode_deploy_src(
    imm: &Immutables,
    order: &Order,
    signature: &OrderSignature,
    amount: u128,
    taker_traits: &TakerTraits,
    args: &[u8],
) -> Result<Vec<u8>, AbiError> {
    let (r, vs) = signature.to_compact();
    let sig = format!(
        "deploySrc({},{},bytes32,bytes32,uint256,uint256,bytes)",
        IMMUTABLES_TUPLE, ORDER_TUPLE
    );
    Ok(AbiEncoder::new()
        .words(&encode_immutables(imm)?)
        .words(&encode_order(order))
        .word(r)
        .word(vs)
        .uint(amount)
        .word(taker_traits.encode())
        .bytes(args)
        .call(&sig))
}

/// Resolver.deployDst(immutables, srcCancellationTimestamp)
pub fn encode_deploy_dst(imm: &Immutables, src_cancellation_timestamp: u64) -> Result<Vec<u8>, AbiError> {
    let sig = format!("deployDst({},uint256)", IMMUTABLES_TUPLE);
    Ok(AbiEncoder::new()
        .words(&encode_immutables(imm)?)
        .uint(src_cancellation_timestamp as u128)
        .call(&sig))
}

/// Resolver.withdraw(escrow, secret, immutables)
pub fn encode_withdraw(escrow: &Address, secret: &Secret, imm: &Immutables) -> Result<Vec<u8>, AbiError> {
    let sig = format!("withdraw(address,bytes32,{})", IMMUTABLES_TUPLE);
    Ok(AbiEncoder::new()
        .address(escrow)
        .word(secret.0)
        .words(&encode_immutables(imm)?)
        .call(&sig))
}

/// Resolver.cancel(escrow, immutables)
pub fn encode_cancel(escrow: &Address, imm: &Immutables) -> Result<Vec<u8>, AbiError> {
    let sig = format!("cancel(address,{})", IMMUTABLES_TUPLE);
    Ok(AbiEncoder::new()
        .address(escrow)
        .words(&encode_immutables(imm)?)
        .call(&sig))
}

/// Escrow.publicWithdraw(secret, immutables)
pub fn encode_public_withdraw(secret: &Secret, imm: &Immutables) -> Result<Vec<u8>, AbiError> {
    let sig = format!("publicWithdraw(bytes32,{})", IMMUTABLES_TUPLE);
    Ok(AbiEncoder::new()
        .word(secret.0)
        .words(&encode_immutables(imm)?)
        .call(&sig))
}

/// Escrow.publicCancel(immutables)
pub fn encode_public_cancel(imm: &Immutables) -> Result<Vec<u8>, AbiError> {
    let sig = format!("publicCancel({})", IMMUTABLES_TUPLE);
    Ok(AbiEncoder::new().words(&encode_immutables(imm)?).call(&sig))
}

pub fn encode_erc20_transfer(to: &Address, amount: u128) -> Vec<u8> {
    AbiEncoder::new().address(to).uint(amount).call("transfer(address,uint256)")
}

pub fn encode_erc20_approve(spender: &Address, amount: u128) -> Vec<u8> {
    AbiEncoder::new().address(spender).uint(amount).call("approve(address,uint256)")
}

pub fn encode_balance_of(owner: &Address) -> Vec<u8> {
    AbiEncoder::new().address(owner).call("balanceOf(address)")
}

// =============================================================================
// Strict Decoding
// =============================================================================

/// Reader over an exact number of static words
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    /// Fails unless `data` is exactly `words` words long
    pub fn exact(data: &'a [u8], words: usize) -> Result<Self, AbiError> {
        if data.len() != words * 32 {
            return Err(AbiError(format!(
                "expected {} bytes, got {}",
                words * 32,
                data.len()
            )));
        }
        Ok(AbiReader { data })
    }

    pub fn word(&self, i: usize) -> Word {
        let mut w = [0u8; 32];
        w.copy_from_slice(&self.data[i * 32..(i + 1) * 32]);
        w
    }

    pub fn uint128(&self, i: usize) -> Result<u128, AbiError> {
        from_word(&self.word(i)).ok_or_else(|| AbiError(format!("word {} exceeds u128", i)))
    }

    pub fn uint64(&self, i: usize) -> Result<u64, AbiError> {
        let v = self.uint128(i)?;
        u64::try_from(v).map_err(|_| AbiError(format!("word {} exceeds u64", i)))
    }

    /// Strict 20-byte address
    pub fn evm_address(&self, i: usize) -> Result<Address, AbiError> {
        Address::from_evm_word(&self.word(i))
            .ok_or_else(|| AbiError(format!("word {} is not a clean address", i)))
    }

    /// Address on a chain of `family` (uint256-wide on object ledgers)
    pub fn address_for(&self, i: usize, family: ChainFamily) -> Result<Address, AbiError> {
        match family {
            ChainFamily::Evm => self.evm_address(i),
            ChainFamily::Move => Ok(Address::Object(self.word(i))),
        }
    }
}

/// Check topic0
fn expect_topic(topics: &[Word], kind: EventKind) -> Result<(), AbiError> {
    match topics.first() {
        Some(t) if *t == kind.evm_topic() => Ok(()),
        Some(_) => Err(AbiError(format!("topic0 is not {:?}", kind))),
        None => Err(AbiError("log has no topics".into())),
    }
}

fn read_immutables(r: &AbiReader<'_>, base: usize) -> Result<Immutables, AbiError> {
    Ok(Immutables {
        order_hash: OrderHash(r.word(base)),
        hash_lock: HashLock(r.word(base + 1)),
        maker: r.evm_address(base + 2)?,
        taker: r.evm_address(base + 3)?,
        token: r.evm_address(base + 4)?,
        amount: r.uint128(base + 5)?,
        safety_deposit: r.uint128(base + 6)?,
        time_locks: TimeLocks::unpack(&r.word(base + 7)),
    })
}

// -----------------------------------------------------------------------------
// Events
// -----------------------------------------------------------------------------

pub fn encode_src_escrow_created(imm: &Immutables, complement: &DstComplement) -> Result<(Vec<Word>, Vec<u8>), AbiError> {
    let data = AbiEncoder::new()
        .words(&encode_immutables(imm)?)
        .address(&complement.maker)
        .uint(complement.amount)
        .address(&complement.token)
        .uint(complement.safety_deposit)
        .finish();
    Ok((vec![EventKind::SrcEscrowCreated.evm_topic()], data))
}

/// Decode `SrcEscrowCreated`; `dst_family` decides how complement
/// addresses are read
pub fn decode_src_escrow_created(
    topics: &[Word],
    data: &[u8],
    dst_family: ChainFamily,
) -> Result<(Immutables, DstComplement), AbiError> {
    expect_topic(topics, EventKind::SrcEscrowCreated)?;
    let r = AbiReader::exact(data, SRC_CREATED_WORDS)?;
    let imm = read_immutables(&r, 0)?;
    let complement = DstComplement {
        maker: r.address_for(8, dst_family)?,
        amount: r.uint128(9)?,
        token: r.address_for(10, dst_family)?,
        safety_deposit: r.uint128(11)?,
    };
    Ok((imm, complement))
}

pub fn encode_dst_escrow_created(escrow: &Address, hash_lock: &HashLock, taker: &Address) -> (Vec<Word>, Vec<u8>) {
    let data = AbiEncoder::new()
        .address(escrow)
        .word(hash_lock.0)
        .address(taker)
        .finish();
    (vec![EventKind::DstEscrowCreated.evm_topic()], data)
}

/// Decode `DstEscrowCreated` into (escrow, hash-lock, taker)
pub fn decode_dst_escrow_created(topics: &[Word], data: &[u8]) -> Result<(Address, HashLock, Address), AbiError> {
    expect_topic(topics, EventKind::DstEscrowCreated)?;
    let r = AbiReader::exact(data, DST_CREATED_WORDS)?;
    Ok((r.evm_address(0)?, HashLock(r.word(1)), r.evm_address(2)?))
}

pub fn encode_escrow_withdrawal(secret: &Secret) -> (Vec<Word>, Vec<u8>) {
    (vec![EventKind::EscrowWithdrawal.evm_topic()], secret.0.to_vec())
}

pub fn decode_escrow_withdrawal(topics: &[Word], data: &[u8]) -> Result<Secret, AbiError> {
    expect_topic(topics, EventKind::EscrowWithdrawal)?;
    let r = AbiReader::exact(data, 1)?;
    Ok(Secret(r.word(0)))
}

pub fn encode_escrow_cancelled() -> (Vec<Word>, Vec<u8>) {
    (vec![EventKind::EscrowCancelled.evm_topic()], Vec::new())
}

pub fn decode_escrow_cancelled(topics: &[Word], data: &[u8]) -> Result<(), AbiError> {
    expect_topic(topics, EventKind::EscrowCancelled)?;
    AbiReader::exact(data, 0)?;
    Ok(())
}

// =============================================================================
// CREATE2
// =============================================================================

/// EIP-1167 minimal proxy creation code around `implementation`
pub fn minimal_proxy_init_code(implementation: &Address) -> Vec<u8> {
    const PREFIX: [u8; 20] = [
        0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d,
        0x3d, 0x3d, 0x36, 0x3d, 0x73,
    ];
    const SUFFIX: [u8; 15] = [
        0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
    ];
    let mut code = Vec::with_capacity(55);
    code.extend_from_slice(&PREFIX);
    code.extend_from_slice(implementation.as_bytes());
    code.extend_from_slice(&SUFFIX);
    code
}

/// CREATE2 address of a minimal proxy deployed by `deployer`
pub fn create2_address(deployer: &Address, salt: &Word, implementation: &Address) -> Address {
    let init_hash = keccak256(&minimal_proxy_init_code(implementation));
    let mut buf = Vec::with_capacity(85);
    buf.push(0xff);
    buf.extend_from_slice(deployer.as_bytes());
    buf.extend_from_slice(salt);
    buf.extend_from_slice(&init_hash);
    let hash = keccak256(&buf);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address::Evm(out)
}

/// Escrow clone address for `imm` under `factory`
pub fn escrow_address(factory: &Address, implementation: &Address, imm: &Immutables) -> Result<Address, AbiError> {
    Ok(create2_address(factory, &immutables_hash(imm)?, implementation))
}

// =============================================================================
// Tests
// =============================================================================
