//! Live-object table and baseline reachability.
//!
//! The gate never inspects call payloads; producers describe each call's
//! effect on the object graph explicitly and the table tracks the latest
//! state packet per live object. At trim start a mark phase decides which
//! objects the baseline must recreate.

use std::collections::{HashMap, VecDeque};

use argus_packet::Packet;

/// Opaque producer-side handle, unique per live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

impl core::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Device,
    Queue,
    Swapchain,
    Memory,
    Buffer,
    Image,
    Sampler,
    Pipeline,
    CommandBuffer,
}

impl ObjectKind {
    /// Roots of the baseline reachability walk.
    pub fn is_root(self) -> bool {
        matches!(
            self,
            ObjectKind::Device | ObjectKind::Queue | ObjectKind::Swapchain
        )
    }
}

#[derive(Debug)]
pub struct LiveObject {
    pub handle: ObjectHandle,
    pub kind: ObjectKind,
    /// Handles this object's creating call referenced.
    pub refs: Vec<ObjectHandle>,
    /// Most recent state-bearing packet (creation, superseded by mutations).
    pub latest: Packet,
    /// Set while trimming when a streamed call used or mutated the object.
    pub referenced: bool,
    creation_order: u64,
}

#[derive(Debug, Default)]
pub struct ObjectTable {
    objects: HashMap<ObjectHandle, LiveObject>,
    next_creation: u64,
}

impl ObjectTable {
    pub fn record_create(
        &mut self,
        handle: ObjectHandle,
        kind: ObjectKind,
        refs: Vec<ObjectHandle>,
        packet: Packet,
    ) {
        let creation_order = self.next_creation;
        self.next_creation += 1;
        // Handle reuse after destroy is legal; the new object supersedes.
        self.objects.insert(
            handle,
            LiveObject {
                handle,
                kind,
                refs,
                latest: packet,
                referenced: false,
                creation_order,
            },
        );
    }

    /// Replaces the object's latest-state packet. Unknown handles are
    /// ignored: the object predates capture and cannot be baselined anyway.
    pub fn record_mutate(&mut self, handle: ObjectHandle, packet: Packet) {
        if let Some(obj) = self.objects.get_mut(&handle) {
            obj.latest = packet;
        }
    }

    pub fn mark_referenced(&mut self, handle: ObjectHandle) {
        if let Some(obj) = self.objects.get_mut(&handle) {
            obj.referenced = true;
        }
    }

    pub fn record_destroy(&mut self, handle: ObjectHandle) {
        self.objects.remove(&handle);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&LiveObject> {
        self.objects.get(&handle)
    }

    /// Mark phase: an object is baseline-reachable when a root kind reaches
    /// it over the recorded reference edges, followed in either direction
    /// (a buffer references its device, a swapchain references its images).
    /// Returns the reachable objects in creation order.
    pub fn reachable_in_creation_order(&self) -> Vec<&LiveObject> {
        let mut adjacency: HashMap<ObjectHandle, Vec<ObjectHandle>> = HashMap::new();
        for obj in self.objects.values() {
            for &referenced in &obj.refs {
                adjacency.entry(obj.handle).or_default().push(referenced);
                adjacency.entry(referenced).or_default().push(obj.handle);
            }
        }

        let mut marked: HashMap<ObjectHandle, bool> =
            self.objects.keys().map(|&h| (h, false)).collect();
        let mut queue: VecDeque<ObjectHandle> = self
            .objects
            .values()
            .filter(|o| o.kind.is_root())
            .map(|o| o.handle)
            .collect();
        for &h in &queue {
            marked.insert(h, true);
        }
        while let Some(handle) = queue.pop_front() {
            if let Some(neighbors) = adjacency.get(&handle) {
                for &next in neighbors {
                    if let Some(mark) = marked.get_mut(&next) {
                        if !*mark {
                            *mark = true;
                            queue.push_back(next);
                        }
                    }
                }
            }
        }

        let mut reachable: Vec<&LiveObject> = self
            .objects
            .values()
            .filter(|o| marked[&o.handle])
            .collect();
        reachable.sort_by_key(|o| o.creation_order);
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_packet::{PacketTimes, PacketTypeId};

    fn pkt(seq: u64) -> Packet {
        let mut p = Packet::with_body(
            PacketTypeId::FIRST_API_CALL,
            1,
            PacketTimes::default(),
            &seq.to_le_bytes(),
        );
        p.set_sequence(seq);
        p
    }

    const DEV: ObjectHandle = ObjectHandle(0x10);
    const BUF: ObjectHandle = ObjectHandle(0x20);
    const MEM: ObjectHandle = ObjectHandle(0x30);
    const ORPHAN: ObjectHandle = ObjectHandle(0x40);

    fn populated() -> ObjectTable {
        let mut table = ObjectTable::default();
        table.record_create(DEV, ObjectKind::Device, vec![], pkt(0));
        table.record_create(BUF, ObjectKind::Buffer, vec![DEV], pkt(1));
        table.record_create(MEM, ObjectKind::Memory, vec![BUF], pkt(2));
        table.record_create(ORPHAN, ObjectKind::Sampler, vec![], pkt(3));
        table
    }

    #[test]
    fn reachability_follows_edges_transitively() {
        let table = populated();
        let reachable = table.reachable_in_creation_order();
        let handles: Vec<_> = reachable.iter().map(|o| o.handle).collect();
        assert_eq!(handles, vec![DEV, BUF, MEM]);
    }

    #[test]
    fn destroy_prunes_the_subgraph() {
        let mut table = populated();
        table.record_destroy(BUF);
        let handles: Vec<_> = table
            .reachable_in_creation_order()
            .iter()
            .map(|o| o.handle)
            .collect();
        // The memory's only path to a root went through the buffer.
        assert_eq!(handles, vec![DEV]);
    }

    #[test]
    fn mutation_supersedes_creation_packet() {
        let mut table = populated();
        table.record_mutate(BUF, pkt(9));
        assert_eq!(table.get(BUF).unwrap().latest.header().sequence, 9);
    }

    #[test]
    fn handle_reuse_replaces_the_old_object() {
        let mut table = populated();
        table.record_destroy(ORPHAN);
        table.record_create(ORPHAN, ObjectKind::Queue, vec![], pkt(7));
        assert_eq!(table.get(ORPHAN).unwrap().kind, ObjectKind::Queue);
        assert_eq!(table.len(), 4);
    }
}
