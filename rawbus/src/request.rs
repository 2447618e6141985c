//! Unit of work moved between submission, completion and consumption

use alloc::sync::Arc;
use alloc::vec::Vec;
use rawbus_core::{Generation, Label, NodeId};

use crate::client::ClientMemory;
use crate::format::{ErrorCode, RequestRecord};

/// Result data owned by a request
#[derive(Debug, Default)]
pub(crate) enum Payload {
    #[default]
    None,
    Owned(Vec<u8>),
    /// Isochronous data shared by every subscriber of the inbound packet
    Shared(Arc<[u8]>),
}

impl Payload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Owned(data) => data,
            Self::Shared(data) => data,
        }
    }
}

/// Request with its outcome
///
/// The echoed record is immutable after decoding. A request lives in exactly one place:
/// the submitting call, one pending queue or one completed queue.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: u64,
    pub record: RequestRecord,
    pub generation: Generation,
    pub misc: u32,
    pub error: ErrorCode,
    pub length: u32,
    pub payload: Payload,
    /// Transaction label held until the completion is processed
    pub label: Option<(NodeId, Label)>,
}

impl PendingRequest {
    pub fn new(id: u64, record: RequestRecord) -> Self {
        Self {
            id,
            record,
            generation: Generation::new(record.generation),
            misc: record.misc,
            error: ErrorCode::Success,
            length: record.length,
            payload: Payload::None,
            label: None,
        }
    }

    pub fn fail(&mut self, error: ErrorCode) {
        self.error = error;
        self.length = 0;
    }

    /// Stores the result data and encodes the reply
    ///
    /// A result that cannot be stored to client memory turns into a payload fault.
    pub fn into_reply(self, memory: &dyn ClientMemory) -> [u8; RequestRecord::SIZE] {
        let mut reply = self.record;
        reply.generation = self.generation.into_u32();
        reply.misc = self.misc;
        reply.error = self.error.into_u32();
        reply.length = self.length;

        let data = self.payload.as_slice();
        let length = data.len().min(self.length as usize);
        if length > 0 && memory.write(reply.recv_buffer, &data[..length]).is_err() {
            debug!("request {}: result store faulted", self.id);
            reply.error = ErrorCode::PayloadFault.into_u32();
        }
        reply.to_bytes()
    }
}
