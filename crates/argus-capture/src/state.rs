//! The capture gate.
//!
//! One `CaptureState` value is injected into the interception layer at
//! process start. It owns the trim mode, the live-object table, the global
//! sequence counter and the packet sink. Streaming hands the gate lock off
//! to the sink lock: the sink lock is taken before the gate lock is dropped,
//! so packets reach the transport in sequence order while socket work never
//! happens under the gate lock. Lock order is always gate, then sink.

use std::sync::Mutex;

use argus_packet::{Packet, PacketTags};
use tracing::{debug, info};

use crate::error::Result;
use crate::objects::{ObjectHandle, ObjectKind, ObjectTable};
use crate::options::CaptureOptions;
use crate::trim::{TrimMode, TrimTrigger};

/// Where streamed packets go. The socket client implements this; tests use
/// [`MemorySink`].
pub trait PacketSink: Send {
    fn send(&mut self, packet: &Packet) -> Result<()>;
}

/// In-memory sink, shared through a handle so tests can inspect the stream.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(pub std::sync::Arc<Mutex<Vec<Packet>>>);

impl PacketSink for MemorySink {
    fn send(&mut self, packet: &Packet) -> Result<()> {
        self.0.lock().unwrap().push(packet.clone());
        Ok(())
    }
}

/// How a finalized call relates to the object graph. The producer states it;
/// the gate never parses call payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEffect {
    None,
    Creates {
        handle: ObjectHandle,
        kind: ObjectKind,
        refs: Vec<ObjectHandle>,
    },
    Mutates {
        handle: ObjectHandle,
    },
    Uses {
        handles: Vec<ObjectHandle>,
    },
    Destroys {
        handle: ObjectHandle,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Streamed,
    /// Retained in the live-object table for a later baseline.
    Buffered,
    Discarded,
}

struct Gate {
    mode: TrimMode,
    trigger: TrimTrigger,
    objects: ObjectTable,
    sequence: u64,
    frame: u64,
}

pub struct CaptureState {
    gate: Mutex<Gate>,
    sink: Mutex<Box<dyn PacketSink>>,
    max_trim_batch: usize,
}

impl CaptureState {
    pub fn new(options: &CaptureOptions, sink: Box<dyn PacketSink>) -> Self {
        let mode = match options.trigger {
            TrimTrigger::None => TrimMode::Disabled,
            _ => TrimMode::PreTrim,
        };
        Self {
            gate: Mutex::new(Gate {
                mode,
                trigger: options.trigger.clone(),
                objects: ObjectTable::default(),
                sequence: 0,
                frame: 0,
            }),
            sink: Mutex::new(sink),
            max_trim_batch: options.max_trim_batch.max(1),
        }
    }

    pub fn mode(&self) -> TrimMode {
        self.gate.lock().unwrap().mode
    }

    /// Hands a finalized packet to the gate. The sequence counter advances
    /// for every submission, whatever the disposition.
    pub fn submit(&self, mut packet: Packet, effect: ObjectEffect) -> Result<Disposition> {
        let mut gate = self.gate.lock().unwrap();
        packet.set_sequence(gate.sequence);
        gate.sequence += 1;
        let disposition = match gate.mode {
            TrimMode::Disabled => {
                gate.apply_effect(&packet, &effect, false);
                Disposition::Streamed
            }
            TrimMode::PreTrim => match effect {
                ObjectEffect::Creates { handle, kind, refs } => {
                    gate.objects.record_create(handle, kind, refs, packet.clone());
                    Disposition::Buffered
                }
                ObjectEffect::Mutates { handle } => {
                    gate.objects.record_mutate(handle, packet.clone());
                    Disposition::Buffered
                }
                ObjectEffect::Destroys { handle } => {
                    gate.objects.record_destroy(handle);
                    Disposition::Discarded
                }
                ObjectEffect::None | ObjectEffect::Uses { .. } => Disposition::Discarded,
            },
            TrimMode::Trimming => {
                gate.apply_effect(&packet, &effect, true);
                Disposition::Streamed
            }
            TrimMode::PostTrim => Disposition::Discarded,
        };
        if disposition == Disposition::Streamed {
            // Lock handoff: the sink lock is taken while the gate lock is
            // still held, so no later sequence can reach the sink first.
            let mut sink = self.sink.lock().unwrap();
            drop(gate);
            sink.send(&packet)?;
        }
        Ok(disposition)
    }

    /// Called once per presentation call; the only place triggers fire.
    pub fn on_present(&self, hotkey_pressed: bool) -> Result<()> {
        let mut gate = self.gate.lock().unwrap();
        gate.frame += 1;
        let (start, stop) = match (&gate.trigger, gate.mode) {
            (TrimTrigger::Frames { start, .. }, TrimMode::PreTrim) => {
                (gate.frame >= *start, false)
            }
            (TrimTrigger::Frames { end, .. }, TrimMode::Trimming) => {
                (false, gate.frame >= *end)
            }
            (TrimTrigger::Hotkey(_), TrimMode::PreTrim) => (hotkey_pressed, false),
            (TrimTrigger::Hotkey(_), TrimMode::Trimming) => (false, hotkey_pressed),
            _ => (false, false),
        };
        if stop {
            info!(frame = gate.frame, "trim range closed");
            gate.mode = TrimMode::PostTrim;
            return Ok(());
        }
        if !start {
            return Ok(());
        }
        let baseline = gate.synthesize_baseline();
        info!(
            frame = gate.frame,
            baseline = baseline.len(),
            "trim range opened"
        );
        gate.mode = TrimMode::Trimming;

        // Same handoff as `submit`: producers that observe `Trimming` once
        // the gate lock drops queue behind the sink lock, so every baseline
        // packet reaches the transport before any subsequent live call.
        let mut sink = self.sink.lock().unwrap();
        drop(gate);
        for batch in baseline.chunks(self.max_trim_batch) {
            for packet in batch {
                sink.send(packet)?;
            }
            debug!(sent = batch.len(), "baseline batch streamed");
        }
        Ok(())
    }
}

impl Gate {
    /// Keeps the object table current while packets stream. In trimming mode
    /// uses and mutations also leave the reference mark.
    fn apply_effect(&mut self, packet: &Packet, effect: &ObjectEffect, trimming: bool) {
        match effect {
            ObjectEffect::None => {}
            ObjectEffect::Creates { handle, kind, refs } => {
                self.objects
                    .record_create(*handle, *kind, refs.clone(), packet.clone());
            }
            ObjectEffect::Mutates { handle } => {
                self.objects.record_mutate(*handle, packet.clone());
                if trimming {
                    self.objects.mark_referenced(*handle);
                }
            }
            ObjectEffect::Uses { handles } => {
                if trimming {
                    for handle in handles {
                        self.objects.mark_referenced(*handle);
                    }
                }
            }
            ObjectEffect::Destroys { handle } => {
                self.objects.record_destroy(*handle);
            }
        }
    }

    /// One injected packet per baseline-reachable live object, in creation
    /// order, each carrying the object's latest observed state.
    fn synthesize_baseline(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        let mut sequence = self.sequence;
        for obj in self.objects.reachable_in_creation_order() {
            let mut packet = obj.latest.clone();
            packet.set_sequence(sequence);
            sequence += 1;
            packet.add_tags(PacketTags::INJECTED);
            packets.push(packet);
        }
        self.sequence = sequence;
        packets
    }
}
