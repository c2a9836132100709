mod eviction;

use log::{debug, trace};

use crate::{KernelAddr, ProcessId, VirtAddr};

/// A physical user page that currently backs (or is about to back) a virtual page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub kaddr: KernelAddr,

    /// Process the frame was allocated for. Only an identifier, the
    /// address space itself is looked up when needed.
    pub owner: ProcessId,

    /// Virtual page this frame is installed at, `None` until the fault
    /// handler finished filling it. Frames without it are never evicted.
    pub vaddr: Option<VirtAddr>,
}

impl Frame {
    pub fn new(kaddr: KernelAddr, owner: ProcessId) -> Self {
        Self {
            kaddr,
            owner,
            vaddr: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.vaddr.is_some()
    }
}

/// All frames of all processes together with the clock hand of the
/// second chance replacement.
///
/// The accessed bits live in the page directories of the owners, so every
/// operation that moves the clock hand takes a `probe`: it is called for an
/// installed frame and returns whether its page was accessed since the last
/// sweep, clearing the bit in the same step. `None` means the frame can not be
/// judged right now and is skipped.
pub struct FrameTable {
    frames: Vec<Frame>,

    /// Clock hand: the frame that gets evicted next
    victim: Option<KernelAddr>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            victim: None,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn register(&mut self, frame: Frame) {
        debug_assert!(
            self.lookup(frame.kaddr).is_none(),
            "frame {} registered twice",
            frame.kaddr
        );

        trace!("register frame {} for {}", frame.kaddr, frame.owner);
        self.frames.push(frame);
    }

    /// Removes the frame of `kaddr` from the table.
    ///
    /// The clock hand has to be moved away from it before, see `replace_victim`.
    pub fn unregister(&mut self, kaddr: KernelAddr) -> Option<Frame> {
        let index = self.position(kaddr)?;

        debug_assert!(
            self.victim != Some(kaddr),
            "frame {} removed while it is the victim",
            kaddr
        );
        if self.victim == Some(kaddr) {
            self.victim = None;
        }

        trace!("unregister frame {}", kaddr);
        Some(self.frames.remove(index))
    }

    pub fn lookup(&self, kaddr: KernelAddr) -> Option<&Frame> {
        self.frames.iter().find(|frame| frame.kaddr == kaddr)
    }

    /// Records that the frame at `kaddr` now backs `vaddr`
    pub fn install_vaddr(&mut self, kaddr: KernelAddr, vaddr: VirtAddr) -> bool {
        match self.frames.iter_mut().find(|frame| frame.kaddr == kaddr) {
            Some(frame) => {
                frame.vaddr = Some(vaddr);
                true
            }
            None => false,
        }
    }

    pub fn victim(&self) -> Option<KernelAddr> {
        self.victim
    }

    pub fn is_victim(&self, kaddr: KernelAddr) -> bool {
        self.victim == Some(kaddr)
    }

    fn position(&self, kaddr: KernelAddr) -> Option<usize> {
        self.frames.iter().position(|frame| frame.kaddr == kaddr)
    }

    /// Returns the current victim, selecting one first if the clock hand is unset
    pub fn current_victim<P>(&mut self, probe: P) -> Option<Frame>
    where
        P: FnMut(&Frame) -> Option<bool>,
    {
        let victim = match self.victim {
            Some(kaddr) if self.position(kaddr).is_some() => kaddr,
            _ => self.select_victim(probe)?,
        };

        self.lookup(victim).copied()
    }

    /// Moves the clock hand to the next victim.
    ///
    /// Starts right after the current victim (or at the front if there is none)
    /// and wraps around. Installed frames that were accessed get a second chance:
    /// their bit is cleared and the sweep continues. The first installed frame
    /// with a clear bit becomes the victim.
    ///
    /// The sweep makes at most two rounds, so with `n` frames at most `n` bits
    /// are cleared before a frame with a cleared bit shows up again. Returns
    /// `None` (and unsets the hand) if no frame is eligible.
    pub fn select_victim<P>(&mut self, mut probe: P) -> Option<KernelAddr>
    where
        P: FnMut(&Frame) -> Option<bool>,
    {
        let len = self.frames.len();
        if len == 0 {
            self.victim = None;
            return None;
        }

        let start = match self.victim.and_then(|kaddr| self.position(kaddr)) {
            Some(index) => (index + 1) % len,
            None => 0,
        };

        for step in 0..2 * len {
            let frame = &self.frames[(start + step) % len];
            if !frame.is_installed() {
                continue;
            }

            match probe(frame) {
                Some(false) => {
                    debug!("selected victim {} ({})", frame.kaddr, frame.owner);
                    self.victim = Some(frame.kaddr);
                    return self.victim;
                }
                // accessed: second chance, the probe cleared the bit
                Some(true) => continue,
                None => continue,
            }
        }

        self.victim = None;
        None
    }

    /// Moves the clock hand away from `excluded`, which is about to be destroyed.
    ///
    /// Selects again up to `retry_limit` times until the victim differs from
    /// `excluded`. If the table is too small for that, the hand is unset and
    /// the next eviction selects lazily.
    pub fn replace_victim<P>(&mut self, excluded: KernelAddr, retry_limit: usize, mut probe: P)
    where
        P: FnMut(&Frame) -> Option<bool>,
    {
        for _ in 0..retry_limit {
            match self.select_victim(&mut probe) {
                Some(kaddr) if kaddr != excluded => return,
                Some(_) => continue,
                None => break,
            }
        }

        debug!("could not replace victim {}, unset clock hand", excluded);
        self.victim = None;
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::{Frame, FrameTable};
    use crate::{KernelAddr, ProcessId, VirtAddr, PAGE_SIZE, PHYS_BASE};

    const OWNER: ProcessId = ProcessId(1);

    fn kaddr(i: usize) -> KernelAddr {
        KernelAddr::new(PHYS_BASE + i * PAGE_SIZE)
    }

    fn vaddr(i: usize) -> VirtAddr {
        VirtAddr::new(0x1000_0000 + i * PAGE_SIZE)
    }

    /// table with `n` installed frames and a fake accessed bit per frame
    fn table_with(n: usize, accessed: bool) -> (FrameTable, BTreeMap<KernelAddr, bool>) {
        let mut table = FrameTable::new();
        let mut bits = BTreeMap::new();
        for i in 0..n {
            table.register(Frame::new(kaddr(i), OWNER));
            assert!(table.install_vaddr(kaddr(i), vaddr(i)));
            bits.insert(kaddr(i), accessed);
        }

        (table, bits)
    }

    fn probe<'a>(
        bits: &'a mut BTreeMap<KernelAddr, bool>,
        cleared: &'a mut usize,
    ) -> impl FnMut(&Frame) -> Option<bool> + 'a {
        move |frame| {
            let bit = bits.get_mut(&frame.kaddr)?;
            let was_set = *bit;
            if was_set {
                *bit = false;
                *cleared += 1;
            }
            Some(was_set)
        }
    }

    #[test]
    fn test_select_skips_accessed() {
        let (mut table, mut bits) = table_with(4, false);
        bits.insert(kaddr(0), true);
        bits.insert(kaddr(1), true);

        let mut cleared = 0;
        assert_eq!(table.select_victim(probe(&mut bits, &mut cleared)), Some(kaddr(2)));
        assert_eq!(cleared, 2);
        assert!(!bits[&kaddr(0)]);
        assert!(!bits[&kaddr(1)]);

        // continues after the current victim
        assert_eq!(table.select_victim(probe(&mut bits, &mut cleared)), Some(kaddr(3)));
        // and wraps around
        assert_eq!(table.select_victim(probe(&mut bits, &mut cleared)), Some(kaddr(0)));
        assert_eq!(cleared, 2);
    }

    #[test]
    fn test_bounded_sweep() {
        const N: usize = 7;
        let (mut table, mut bits) = table_with(N, true);

        let mut cleared = 0;
        let victim = table.select_victim(probe(&mut bits, &mut cleared));

        assert_eq!(victim, Some(kaddr(0)));
        assert!(cleared <= N);
        assert!(bits.values().all(|bit| !bit));
    }

    #[test]
    fn test_uninstalled_frames_are_skipped() {
        let mut table = FrameTable::new();
        table.register(Frame::new(kaddr(0), OWNER));
        table.register(Frame::new(kaddr(1), OWNER));

        let mut cleared = 0;
        let mut bits = BTreeMap::new();
        assert_eq!(table.select_victim(probe(&mut bits, &mut cleared)), None);
        assert_eq!(table.victim(), None);

        table.install_vaddr(kaddr(1), vaddr(1));
        bits.insert(kaddr(1), false);
        assert_eq!(table.current_victim(probe(&mut bits, &mut cleared)).map(|f| f.kaddr), Some(kaddr(1)));
    }

    #[test]
    fn test_unjudgeable_frames_are_skipped() {
        let (mut table, _) = table_with(3, false);

        let victim = table.select_victim(|frame| {
            if frame.kaddr == kaddr(0) {
                None
            } else {
                Some(false)
            }
        });
        assert_eq!(victim, Some(kaddr(1)));

        assert_eq!(table.select_victim(|_| None), None);
    }

    #[test]
    fn test_replace_victim() {
        let (mut table, mut bits) = table_with(3, false);
        let mut cleared = 0;

        let victim = table.current_victim(probe(&mut bits, &mut cleared)).unwrap();
        assert_eq!(victim.kaddr, kaddr(0));

        table.replace_victim(victim.kaddr, 10, probe(&mut bits, &mut cleared));
        assert_eq!(table.victim(), Some(kaddr(1)));
        assert_eq!(table.unregister(kaddr(0)).unwrap().vaddr, Some(vaddr(0)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_replace_victim_single_frame_unsets() {
        let (mut table, mut bits) = table_with(1, false);
        let mut cleared = 0;

        table.select_victim(probe(&mut bits, &mut cleared));
        assert!(table.is_victim(kaddr(0)));

        table.replace_victim(kaddr(0), 10, probe(&mut bits, &mut cleared));
        assert_eq!(table.victim(), None);
        assert!(table.unregister(kaddr(0)).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_and_unregister_unknown() {
        let (mut table, _) = table_with(2, false);

        assert_eq!(table.lookup(kaddr(1)).unwrap().vaddr, Some(vaddr(1)));
        assert!(table.lookup(kaddr(5)).is_none());
        assert!(table.unregister(kaddr(5)).is_none());
        assert!(!table.install_vaddr(kaddr(5), vaddr(5)));
    }
}
