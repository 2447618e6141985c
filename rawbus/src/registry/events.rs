use alloc::sync::Arc;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::RawMutex;
use rawbus_core::{Channel, HostId, Topology};
use rawbus_driver::internal::DynamicEvents;

use super::Registry;
use crate::format::{RequestKind, RequestRecord};
use crate::request::{Payload, PendingRequest};
use crate::session::queues::Shared;

type Delivery<M> = (Arc<Shared<M>>, PendingRequest);

impl<M: RawMutex + Send + Sync> DynamicEvents for Registry<M> {
    fn bus_reset(&self, host: HostId, topology: Topology) {
        let deliveries: Vec<Delivery<M>> = self.inner.lock(|inner| {
            let inner = inner.borrow();
            let Some(slot) = inner.slot(host) else {
                warn!("bus reset of unknown host {}", host.into_u32());
                return Vec::new();
            };

            let generation = slot.host.reset(topology);
            debug!(
                "host {}: bus reset, generation {}, node {:x} of {}",
                host.into_u32(),
                generation.into_u32(),
                topology.node_id.into_u16(),
                topology.node_count
            );

            let mut deliveries = Vec::new();
            if deliveries.try_reserve_exact(slot.bindings.len()).is_err() {
                warn!("host {}: bus reset notifications dropped", host.into_u32());
                return deliveries;
            }
            for binding in &slot.bindings {
                let record = RequestRecord {
                    kind: RequestKind::BusReset.into(),
                    generation: generation.into_u32(),
                    misc: topology.into_u32(),
                    ..Default::default()
                };
                let request = PendingRequest::new(binding.session.next_request_id(), record);
                deliveries.push((binding.session.clone(), request));
            }
            deliveries
        });

        for (session, request) in deliveries {
            session.push_completed(request);
        }
    }

    fn iso_receive(&self, host: HostId, channel: Channel, data: &[u8]) {
        let deliveries: Vec<Delivery<M>> = self.inner.lock(|inner| {
            let inner = inner.borrow();
            let Some(slot) = inner.slot(host) else {
                return Vec::new();
            };
            let generation = slot.host.generation();

            // One copy per inbound packet, shared by every subscriber
            let mut shared: Option<Arc<[u8]>> = None;
            let mut deliveries = Vec::new();
            for binding in &slot.bindings {
                if !binding.channels.contains(channel) {
                    continue;
                }
                if deliveries.try_reserve(1).is_err() {
                    warn!(
                        "host {}: isochronous packet on channel {} dropped",
                        host.into_u32(),
                        channel.into_u8()
                    );
                    deliveries.clear();
                    break;
                }

                // `Arc<[u8]>` has no fallible constructor on stable, so this allocation aborts
                // on out-of-memory. Only the reservation above drops the packet gracefully.
                let payload = shared.get_or_insert_with(|| Arc::from(data)).clone();
                let length = data.len().min(binding.iso_buffer.length as usize);
                let record = RequestRecord {
                    kind: RequestKind::IsoReceive.into(),
                    generation: generation.into_u32(),
                    misc: 0,
                    length: length as u32,
                    recv_buffer: binding.iso_buffer.address,
                    ..Default::default()
                };
                let mut request = PendingRequest::new(binding.session.next_request_id(), record);
                request.payload = Payload::Shared(payload);
                deliveries.push((binding.session.clone(), request));
            }
            deliveries
        });

        if !deliveries.is_empty() {
            trace!(
                "host {}: channel {} delivered to {} sessions",
                host.into_u32(),
                channel.into_u8(),
                deliveries.len()
            );
        }
        for (session, request) in deliveries {
            session.push_completed(request);
        }
    }
}
