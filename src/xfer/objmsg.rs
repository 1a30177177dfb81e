//! Phase-1 object message: encoding of the four tables and decoding into
//! owned records.
//!
//! ```text
//! WireHdr | WireObjMsgHdr | WireObjEntry[n_obj] | WireGid[n_sym]
//!         | WireCpl[n_newcpl] | WireCpl[n_oldcpl] | memory[mem_len]
//! ```
//!
//! Each object occupies `size` payload bytes, `n_refs` little-endian u32
//! symbol indices (1-based, 0 = null) and `aux_len` bytes of auxiliary
//! blocks at its offset in the memory area. An auxiliary area is
//!
//! ```text
//! u32 n_blocks, then per block: u8 kind (0 object, 1 user), u16 type id, u32 count,
//!               then per item:  u32 len, len bytes, u32 n_refs, n_refs x u32 index
//! ```

use crate::algs::wire::{
    KIND_OBJ_MSG, MemReader, WIRE_VERSION, WireCpl, WireGid, WireHdr, WireObjEntry, WireObjMsgHdr,
    put_pod, put_pods,
};
use crate::ddd::gid::Gid;
use crate::ddd::priority::Priority;
use crate::ddd::types::{AuxType, DddType};
use crate::ddd_error::DddError;
use crate::xfer::intents::CplHint;

pub(crate) const AUX_KIND_OBJECT: u8 = 0;
pub(crate) const AUX_KIND_USER: u8 = 1;

/// One received auxiliary item; references are still symbol indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AuxItemIn {
    pub data: Vec<u8>,
    pub refs: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AuxBlockIn {
    pub typ: AuxType,
    pub items: Vec<AuxItemIn>,
}

/// One received object copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ObjEntry {
    pub gid: Gid,
    pub typ: DddType,
    pub prio: Priority,
    pub attr: u32,
    pub data: Vec<u8>,
    pub refs: Vec<u32>,
    pub aux: Vec<AuxBlockIn>,
}

/// A decoded Phase-1 message.
#[derive(Clone, Debug, Default)]
pub(crate) struct ObjMsg {
    pub from: usize,
    /// Sorted by GID.
    pub objs: Vec<ObjEntry>,
    /// Sorted by GID; symbol index `i` names `syms[i - 1]`.
    pub syms: Vec<Gid>,
    pub new_cpl: Vec<CplHint>,
    pub old_cpl: Vec<CplHint>,
}

#[cfg(test)]
impl ObjMsg {
    /// GID named by a 1-based symbol index.
    pub fn symbol(&self, idx: u32) -> Option<Gid> {
        match idx {
            0 => None,
            i => self.syms.get(i as usize - 1).copied(),
        }
    }
}

/// Assemble the wire bytes of one message.
pub(crate) fn encode(
    entries: &[WireObjEntry],
    syms: &[Gid],
    new_cpl: &[CplHint],
    old_cpl: &[CplHint],
    mem: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        32 + entries.len() * 40 + syms.len() * 8 + (new_cpl.len() + old_cpl.len()) * 16 + mem.len(),
    );
    put_pod(&mut out, &WireHdr::new(KIND_OBJ_MSG));
    put_pod(
        &mut out,
        &WireObjMsgHdr::new(entries.len(), syms.len(), new_cpl.len(), old_cpl.len(), mem.len()),
    );
    put_pods(&mut out, entries);
    let syms: Vec<WireGid> = syms.iter().map(|g| WireGid::of(g.get())).collect();
    put_pods(&mut out, &syms);
    for table in [new_cpl, old_cpl] {
        let recs: Vec<WireCpl> = table
            .iter()
            .map(|h| WireCpl::new(h.gid.get(), h.proc as u32, h.prio.get()))
            .collect();
        put_pods(&mut out, &recs);
    }
    out.extend_from_slice(mem);
    out
}

fn hints(recs: Vec<WireCpl>, procs: usize) -> Result<Vec<CplHint>, String> {
    recs.iter()
        .map(|r| {
            let (gid, proc, prio) = r.decode();
            let proc = proc as usize;
            if proc >= procs {
                return Err(format!("coupling hint names rank {proc}"));
            }
            let prio =
                Priority::from_wire(prio).ok_or_else(|| format!("priority {prio} out of range"))?;
            Ok(CplHint {
                gid: Gid::new(gid),
                proc,
                prio,
            })
        })
        .collect()
}

fn indices(r: &mut MemReader<'_>, n: usize, n_sym: usize) -> Result<Vec<u32>, String> {
    (0..n)
        .map(|_| {
            let i = r.u32()?;
            if i as usize > n_sym {
                return Err(format!("symbol index {i} beyond table of {n_sym}"));
            }
            Ok(i)
        })
        .collect()
}

fn aux_blocks(buf: &[u8], n_sym: usize) -> Result<Vec<AuxBlockIn>, String> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let mut r = MemReader::new(buf);
    let n_blocks = r.u32()? as usize;
    let mut blocks = Vec::with_capacity(n_blocks.min(buf.len()));
    for _ in 0..n_blocks {
        let kind = r.u8()?;
        let id = r.u16()?;
        let typ = match kind {
            AUX_KIND_OBJECT => AuxType::Object(DddType(id)),
            AUX_KIND_USER => AuxType::User(id),
            k => return Err(format!("unknown auxiliary block kind {k}")),
        };
        let count = r.u32()? as usize;
        let mut items = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            let len = r.u32()? as usize;
            let data = r.take(len)?.to_vec();
            let n_refs = r.u32()? as usize;
            let refs = indices(&mut r, n_refs, n_sym)?;
            items.push(AuxItemIn { data, refs });
        }
        blocks.push(AuxBlockIn { typ, items });
    }
    r.finish()?;
    Ok(blocks)
}

fn decode_inner(from: usize, bytes: &[u8], procs: usize) -> Result<ObjMsg, String> {
    let mut r = MemReader::new(bytes);
    let hdr: WireHdr = r.pod()?;
    if hdr.version() != WIRE_VERSION || hdr.kind() != KIND_OBJ_MSG {
        return Err(format!("unexpected header v{} kind {}", hdr.version(), hdr.kind()));
    }
    let counts: WireObjMsgHdr = r.pod()?;
    let (n_obj, n_sym, n_new, n_old, mem_len) = counts.counts();
    let entries: Vec<WireObjEntry> = r.pods(n_obj)?;
    let syms: Vec<Gid> = r
        .pods::<WireGid>(n_sym)?
        .iter()
        .map(|g| Gid::new(g.get()))
        .collect();
    if syms.windows(2).any(|w| w[0] >= w[1]) {
        return Err("symbol table not sorted".into());
    }
    let new_cpl = hints(r.pods(n_new)?, procs)?;
    let old_cpl = hints(r.pods(n_old)?, procs)?;
    let mem = r.take(mem_len)?;
    r.finish()?;

    let mut objs = Vec::with_capacity(entries.len());
    for e in &entries {
        let (size, n_refs, aux_len) = e.lens();
        let start = e.offset();
        let total = size + 4 * n_refs + aux_len;
        let area = start
            .checked_add(total)
            .and_then(|end| mem.get(start..end))
            .ok_or_else(|| format!("object {:#x} exceeds memory area", e.gid()))?;
        let mut m = MemReader::new(area);
        let data = m.take(size)?.to_vec();
        let refs = indices(&mut m, n_refs, n_sym)?;
        let aux = aux_blocks(m.take(aux_len)?, n_sym)?;
        let prio = Priority::from_wire(e.prio)
            .ok_or_else(|| format!("priority {} out of range", e.prio))?;
        objs.push(ObjEntry {
            gid: Gid::new(e.gid()),
            typ: DddType(e.typ()),
            prio,
            attr: e.attr(),
            data,
            refs,
            aux,
        });
    }
    if objs.windows(2).any(|w| w[0].gid >= w[1].gid) {
        return Err("object table not sorted by GID".into());
    }
    Ok(ObjMsg {
        from,
        objs,
        syms,
        new_cpl,
        old_cpl,
    })
}

/// Decode a Phase-1 message received from `from`.
pub(crate) fn decode(from: usize, bytes: &[u8], procs: usize) -> Result<ObjMsg, DddError> {
    decode_inner(from, bytes, procs).map_err(|reason| DddError::MalformedMessage { from, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::wire::MemWriter;

    #[test]
    fn one_object_with_aux_block() {
        let mut mem = MemWriter::default();
        mem.put_slice(&[7, 7, 7]);
        mem.put_u32(1);
        mem.put_u32(0);
        let aux_start = mem.len();
        mem.put_u32(1);
        mem.put_u8(AUX_KIND_USER);
        mem.put_u16(3);
        mem.put_u32(1);
        mem.put_u32(2);
        mem.put_slice(&[9, 8]);
        mem.put_u32(1);
        mem.put_u32(1);
        let aux_len = mem.len() - aux_start;
        let entry = WireObjEntry::new(42, 0, 1, 5, 0, 3, 2, aux_len);
        let syms = [Gid::new(42)];
        let hint = CplHint {
            gid: Gid::new(42),
            proc: 1,
            prio: Priority::new(2).unwrap(),
        };
        let bytes = encode(&[entry], &syms, &[], &[hint], &mem.into_inner());

        let msg = decode(0, &bytes, 3).unwrap();
        assert_eq!(msg.objs.len(), 1);
        let o = &msg.objs[0];
        assert_eq!((o.gid, o.attr, o.data.as_slice()), (Gid::new(42), 5, &[7u8, 7, 7][..]));
        assert_eq!(o.refs, vec![1, 0]);
        assert_eq!(msg.symbol(o.refs[0]), Some(Gid::new(42)));
        assert_eq!(msg.symbol(0), None);
        assert_eq!(o.aux[0].typ, AuxType::User(3));
        assert_eq!(o.aux[0].items[0].data, vec![9, 8]);
        assert_eq!(msg.old_cpl, vec![hint]);
    }

    #[test]
    fn truncated_message_is_malformed() {
        let bytes = encode(&[WireObjEntry::new(1, 0, 0, 0, 0, 16, 0, 0)], &[], &[], &[], &[0; 4]);
        assert!(matches!(
            decode(2, &bytes, 3),
            Err(DddError::MalformedMessage { from: 2, .. })
        ));
    }

    #[test]
    fn dangling_symbol_index_is_malformed() {
        let mut mem = MemWriter::default();
        mem.put_u32(3);
        let bytes = encode(
            &[WireObjEntry::new(1, 0, 0, 0, 0, 0, 1, 0)],
            &[Gid::new(1)],
            &[],
            &[],
            &mem.into_inner(),
        );
        assert!(decode(1, &bytes, 2).is_err());
    }
}
