//! Multi-port banked scratchpad with per-bank arbitration.
//!
//! # Architecture
//!
//! ```text
//!   ClientRequest ──► compute bank requests ──► ArbitratedCrossbar ──► BankedMemory
//!   (N lanes)         (bank, index, store)      (per-bank RR, InQ)      (1 op/bank)
//!                                                                           │
//!   ClientResponse ◄──────────── response crossbar ◄── bank responses ◄─────┘
//! ```
//!
//! Every lane of a request shares one operation. Each cycle at most one
//! request per bank reaches memory. A lane's response is valid only when its
//! LOAD won its bank this cycle; stores produce no response. Lanes whose
//! input queue is full report `ready = false` and must be re-presented.

use crate::arb::{crossbar, ArbitratedCrossbar};
use crate::bits::{log2_ceil, BitsError, Marshallable, Marshaller, Unmarshaller};
use crate::mem::banked::{split_addr, BankedMemory};

/// Operation shared by all lanes of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientOp {
    #[default]
    Load,
    Store,
}

/// Client request: one operation, per-lane valid/address/data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest<T> {
    pub op: ClientOp,
    pub valid: Vec<bool>,
    pub addr: Vec<u64>,
    pub data: Vec<T>,
}

impl<T: Clone + Default> ClientRequest<T> {
    /// Request with every lane idle.
    pub fn new(op: ClientOp, lanes: usize) -> Self {
        Self {
            op,
            valid: vec![false; lanes],
            addr: vec![0; lanes],
            data: vec![T::default(); lanes],
        }
    }

    pub fn load(lanes: usize) -> Self {
        Self::new(ClientOp::Load, lanes)
    }

    pub fn store(lanes: usize) -> Self {
        Self::new(ClientOp::Store, lanes)
    }

    /// Activate `lane` with an address and (for stores) data.
    pub fn with_lane(mut self, lane: usize, addr: u64, data: T) -> Self {
        self.valid[lane] = true;
        self.addr[lane] = addr;
        self.data[lane] = data;
        self
    }

    pub fn lanes(&self) -> usize {
        self.valid.len()
    }

    /// Clear lanes that were accepted, keeping the rest for a retry.
    pub fn retain_unaccepted(&mut self, ready: &[bool]) {
        for (v, &r) in self.valid.iter_mut().zip(ready) {
            if r {
                *v = false;
            }
        }
    }

    pub fn any_valid(&self) -> bool {
        self.valid.iter().any(|&v| v)
    }
}

/// Per-lane load response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse<T> {
    pub valid: Vec<bool>,
    pub data: Vec<T>,
}

/// Layout of a client message: `(lanes, addr_width)`.
pub type ClientLayout = (usize, u32);

impl<T> Marshallable for ClientRequest<T>
where
    T: Marshallable<Layout = ()> + Clone + Default,
{
    type Layout = ClientLayout;

    fn width(&(lanes, addr_width): &ClientLayout) -> u32 {
        1 + lanes as u32 * (1 + addr_width + T::width(&()))
    }

    fn marshal(&self, &(lanes, addr_width): &ClientLayout, m: &mut Marshaller) {
        m.put_bool(self.op == ClientOp::Store);
        for i in 0..lanes {
            m.put_bool(self.valid[i]);
        }
        for i in 0..lanes {
            m.put(self.addr[i] as u128, addr_width);
        }
        for i in 0..lanes {
            self.data[i].marshal(&(), m);
        }
    }

    fn unmarshal(&(lanes, addr_width): &ClientLayout, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        let op = if u.take_bool()? { ClientOp::Store } else { ClientOp::Load };
        let mut req = Self::new(op, lanes);
        for i in 0..lanes {
            req.valid[i] = u.take_bool()?;
        }
        for i in 0..lanes {
            req.addr[i] = u.take(addr_width)? as u64;
        }
        for i in 0..lanes {
            req.data[i] = T::unmarshal(&(), u)?;
        }
        Ok(req)
    }
}

impl<T> Marshallable for ClientResponse<T>
where
    T: Marshallable<Layout = ()> + Clone + Default,
{
    type Layout = usize;

    fn width(lanes: &usize) -> u32 {
        *lanes as u32 * (1 + T::width(&()))
    }

    fn marshal(&self, lanes: &usize, m: &mut Marshaller) {
        for i in 0..*lanes {
            m.put_bool(self.valid[i]);
        }
        for i in 0..*lanes {
            self.data[i].marshal(&(), m);
        }
    }

    fn unmarshal(lanes: &usize, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        let mut valid = vec![false; *lanes];
        for v in valid.iter_mut() {
            *v = u.take_bool()?;
        }
        let mut data = Vec::with_capacity(*lanes);
        for _ in 0..*lanes {
            data.push(T::unmarshal(&(), u)?);
        }
        Ok(Self { valid, data })
    }
}

/// Request routed to a single bank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankRequest<T> {
    pub do_store: bool,
    /// Index within the bank.
    pub addr: usize,
    pub wdata: T,
    /// Lane the request came from.
    pub input: usize,
}

/// Output of one scratchpad cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchpadOutput<T> {
    pub rsp: ClientResponse<T>,
    /// Per lane: the request offered this cycle was accepted.
    pub ready: Vec<bool>,
}

/// Scratchpad statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchpadStats {
    pub loads: u64,
    pub stores: u64,
    /// Cycles in which some queued lane lost its bank.
    pub bank_conflicts: u64,
}

/// Arbitrated banked scratchpad.
#[derive(Debug, Clone)]
pub struct ArbitratedScratchpad<T> {
    num_inputs: usize,
    addr_width: u32,
    banks: BankedMemory<T>,
    request_xbar: ArbitratedCrossbar<BankRequest<T>>,
    loads: u64,
    stores: u64,
}

impl<T: Clone + Default + std::fmt::Debug> ArbitratedScratchpad<T> {
    /// `capacity` words, `num_inputs` lanes, `num_banks` banks, input queue depth `in_queue`.
    pub fn new(capacity: usize, num_inputs: usize, num_banks: usize, in_queue: usize) -> Self {
        Self {
            num_inputs,
            addr_width: log2_ceil(capacity).max(1),
            banks: BankedMemory::new(capacity, num_banks),
            request_xbar: ArbitratedCrossbar::new(num_inputs, num_banks, in_queue, 0),
            loads: 0,
            stores: 0,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_banks(&self) -> usize {
        self.banks.banks()
    }

    pub fn capacity(&self) -> usize {
        self.banks.capacity()
    }

    /// Bits in a lane address.
    pub fn addr_width(&self) -> u32 {
        self.addr_width
    }

    /// Layout for marshalling this scratchpad's client messages.
    pub fn client_layout(&self) -> ClientLayout {
        (self.num_inputs, self.addr_width)
    }

    /// Drop queued requests and restart arbitration. Memory contents stay.
    pub fn reset(&mut self) {
        self.request_xbar.reset();
        self.loads = 0;
        self.stores = 0;
    }

    /// Backing memory, for inspection and preloading.
    pub fn memory(&self) -> &BankedMemory<T> {
        &self.banks
    }

    pub fn memory_mut(&mut self) -> &mut BankedMemory<T> {
        &mut self.banks
    }

    pub fn stats(&self) -> ScratchpadStats {
        ScratchpadStats {
            loads: self.loads,
            stores: self.stores,
            bank_conflicts: self.request_xbar.conflicts(),
        }
    }

    /// True when no lane has a request waiting in its queue.
    pub fn is_idle(&self) -> bool {
        self.request_xbar.is_all_input_empty()
    }

    /// Split a client request into per-lane bank requests.
    ///
    /// Returns `(requests, bank_select, valid)`.
    pub fn compute_bank_request(&self, req: &ClientRequest<T>) -> (Vec<BankRequest<T>>, Vec<usize>, Vec<bool>) {
        assert_eq!(req.lanes(), self.num_inputs, "scratchpad: request has {} lanes", req.lanes());
        let mut reqs = Vec::with_capacity(self.num_inputs);
        let mut sel = Vec::with_capacity(self.num_inputs);
        for lane in 0..self.num_inputs {
            let addr = req.addr[lane] as usize;
            if req.valid[lane] {
                assert!(
                    addr < self.capacity(),
                    "scratchpad: lane {} address {:#x} beyond capacity {}",
                    lane,
                    addr,
                    self.capacity()
                );
            }
            let loc = split_addr(addr, self.num_banks());
            let do_store = req.valid[lane] && req.op == ClientOp::Store;
            reqs.push(BankRequest {
                do_store,
                addr: loc.index,
                wdata: if do_store { req.data[lane].clone() } else { T::default() },
                input: lane,
            });
            sel.push(loc.bank);
        }
        (reqs, sel, req.valid.clone())
    }

    /// Execute the winning request of every bank.
    fn banks_load_store(&mut self, winners: &[BankRequest<T>], valid: &[bool]) -> (Vec<T>, Vec<bool>) {
        let nbanks = self.num_banks();
        let mut rdata = vec![T::default(); nbanks];
        let mut rvalid = vec![false; nbanks];
        for bank in 0..nbanks {
            if !valid[bank] {
                continue;
            }
            let w = &winners[bank];
            if w.do_store {
                self.banks.write(bank, w.addr, w.wdata.clone());
                self.stores += 1;
            } else {
                rdata[bank] = self.banks.read(bank, w.addr);
                rvalid[bank] = true;
                self.loads += 1;
            }
        }
        self.banks.end_cycle();
        (rdata, rvalid)
    }

    /// One cycle from pre-computed bank requests.
    pub fn load_store_banked(
        &mut self,
        bank_req: &[BankRequest<T>],
        bank_sel: &[usize],
        bank_req_valid: &[bool],
    ) -> ScratchpadOutput<T> {
        let xb = self.request_xbar.run(bank_req, bank_sel, bank_req_valid);
        log::trace!("scratchpad winners {:?} ready {:?}", xb.source, xb.ready);

        let (rdata, rvalid) = self.banks_load_store(&xb.data, &xb.valid);

        // Each load response goes back to the lane that issued it.
        let mut source = vec![0usize; self.num_inputs];
        let mut valid_src = vec![false; self.num_inputs];
        for bank in 0..self.num_banks() {
            if rvalid[bank] {
                let lane = xb.data[bank].input;
                source[lane] = bank;
                valid_src[lane] = true;
            }
        }
        let (data, valid) = crossbar(&rdata, &rvalid, &source, &valid_src);

        ScratchpadOutput {
            rsp: ClientResponse { valid, data },
            ready: xb.ready,
        }
    }

    /// One cycle from a client request.
    pub fn load_store(&mut self, req: &ClientRequest<T>) -> ScratchpadOutput<T> {
        let (reqs, sel, valid) = self.compute_bank_request(req);
        log::debug!("scratchpad {:?} lanes {:?} banks {:?}", req.op, valid, sel);
        self.load_store_banked(&reqs, &sel, &valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::UInt;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn idle(lanes: usize) -> ClientRequest<u32> {
        ClientRequest::load(lanes)
    }

    #[test]
    fn test_store_then_load_distinct_banks() {
        let mut sp = ArbitratedScratchpad::<u32>::new(256, 4, 4, 2);
        let st = ClientRequest::store(4).with_lane(0, 0x04, 0xA1).with_lane(1, 0x05, 0xB2);
        let out = sp.load_store(&st);
        assert_eq!(out.ready, vec![true; 4]);
        assert!(out.rsp.valid.iter().all(|&v| !v));

        let ld = ClientRequest::load(4).with_lane(0, 0x04, 0).with_lane(2, 0x05, 0);
        let out = sp.load_store(&ld);
        assert_eq!(out.ready, vec![true; 4]);
        assert_eq!(out.rsp.valid, vec![true, false, true, false]);
        assert_eq!(out.rsp.data[0], 0xA1);
        assert_eq!(out.rsp.data[2], 0xB2);
        assert_eq!(sp.stats().loads, 2);
        assert_eq!(sp.stats().stores, 2);
    }

    #[test]
    fn test_same_bank_stores_serialize() {
        let mut sp = ArbitratedScratchpad::<u32>::new(64, 2, 4, 2);
        // Addresses 1 and 5 both map to bank 1.
        let st = ClientRequest::store(2).with_lane(0, 1, 11).with_lane(1, 5, 55);
        sp.load_store(&st);
        assert_eq!(*sp.memory().peek_addr(1), 11);
        assert_eq!(*sp.memory().peek_addr(5), 0);
        assert!(!sp.is_idle());
        sp.load_store(&idle(2));
        assert_eq!(*sp.memory().peek_addr(5), 55);
        assert!(sp.is_idle());
        assert_eq!(sp.stats().bank_conflicts, 1);
    }

    #[test]
    fn test_loads_from_same_bank_answer_on_successive_cycles() {
        let mut sp = ArbitratedScratchpad::<u32>::new(64, 2, 4, 2);
        sp.memory_mut().load(2, 20);
        sp.memory_mut().load(6, 60);
        let ld = ClientRequest::load(2).with_lane(0, 2, 0).with_lane(1, 6, 0);
        let first = sp.load_store(&ld);
        assert_eq!(first.rsp.valid, vec![true, false]);
        assert_eq!(first.rsp.data[0], 20);
        let second = sp.load_store(&idle(2));
        assert_eq!(second.rsp.valid, vec![false, true]);
        assert_eq!(second.rsp.data[1], 60);
    }

    #[test]
    fn test_full_queue_reports_not_ready() {
        let mut sp = ArbitratedScratchpad::<u32>::new(16, 2, 1, 1);
        let st = ClientRequest::store(2).with_lane(0, 0, 1).with_lane(1, 1, 2);
        let a = sp.load_store(&st);
        assert_eq!(a.ready, vec![true, true]);
        // Lane 1 still queued; its next offer is refused.
        let b = sp.load_store(&ClientRequest::store(2).with_lane(1, 2, 3));
        assert_eq!(b.ready, vec![true, false]);
        let mut retry = ClientRequest::store(2).with_lane(1, 2, 3);
        retry.retain_unaccepted(&[true, true]);
        assert!(!retry.any_valid());
    }

    #[test]
    fn test_non_power_of_two_banks() {
        let mut sp = ArbitratedScratchpad::<u32>::new(30, 1, 3, 1);
        sp.load_store(&ClientRequest::store(1).with_lane(0, 7, 77));
        assert_eq!(*sp.memory().peek(1, 2), 77);
    }

    #[test]
    fn test_loads_see_most_recent_store() {
        let (capacity, lanes) = (64, 4);
        let mut sp = ArbitratedScratchpad::<u32>::new(capacity, lanes, 4, 2);
        let mut reference: HashMap<u64, u32> = HashMap::new();
        let mut rng = SmallRng::seed_from_u64(0x5eed);

        for step in 0..300 {
            let op = if rng.random_bool(0.5) { ClientOp::Store } else { ClientOp::Load };
            let mut req = ClientRequest::new(op, lanes);
            let mut used = Vec::new();
            for lane in 0..lanes {
                if !rng.random_bool(0.6) {
                    continue;
                }
                // Distinct addresses keep same-request stores order-independent.
                let addr = loop {
                    let a = rng.random_range(0..capacity as u64);
                    if !used.contains(&a) {
                        break a;
                    }
                };
                used.push(addr);
                req = req.with_lane(lane, addr, rng.random());
            }
            let issued = req.clone();

            let mut answers: Vec<Vec<u32>> = vec![Vec::new(); lanes];
            let mut cycles = 0;
            while req.any_valid() || !sp.is_idle() {
                let out = sp.load_store(&req);
                req.retain_unaccepted(&out.ready);
                for lane in 0..lanes {
                    if out.rsp.valid[lane] {
                        answers[lane].push(out.rsp.data[lane]);
                    }
                }
                cycles += 1;
                assert!(cycles < 64, "step {} did not drain", step);
            }

            for lane in 0..lanes {
                let active = issued.valid[lane];
                match op {
                    ClientOp::Store => {
                        assert!(answers[lane].is_empty(), "store answered on lane {}", lane);
                        if active {
                            reference.insert(issued.addr[lane], issued.data[lane]);
                        }
                    }
                    ClientOp::Load if active => {
                        let want = reference.get(&issued.addr[lane]).copied().unwrap_or_default();
                        assert_eq!(answers[lane], vec![want], "step {} lane {}", step, lane);
                    }
                    ClientOp::Load => assert!(answers[lane].is_empty()),
                }
            }
        }

        for (&addr, &val) in &reference {
            assert_eq!(*sp.memory().peek_addr(addr as usize), val);
        }
    }

    #[test]
    fn test_client_request_marshal() {
        let req: ClientRequest<UInt<8>> = ClientRequest::store(2).with_lane(1, 3, UInt::new(0x5A));
        let layout = (2, 4);
        assert_eq!(ClientRequest::<UInt<8>>::width(&layout), 1 + 2 * (1 + 4 + 8));
        let bits = req.to_bits(&layout);
        assert_eq!(bits.len(), 27);
        let back = ClientRequest::<UInt<8>>::from_bits(&layout, &bits).unwrap();
        assert_eq!(back, req);
    }
}
