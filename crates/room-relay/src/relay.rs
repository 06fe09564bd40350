//! Event relay: room resolution, local delivery and backbone fan-out

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backbone::{Backbone, Envelope, EnvelopeHandler};
use crate::connection::{Connection, SendFailure};
use crate::event::{ClientEvent, OutboundEvent, Room};
use crate::protocol::EnginePacket;
use crate::registry::RoomRegistry;

/// Routes client events to room members on this and every other instance
#[derive(Clone)]
pub struct EventRelay {
    instance_id: String,
    registry: RoomRegistry,
    backbone: Arc<dyn Backbone>,
}

impl EventRelay {
    pub fn new(
        instance_id: impl Into<String>,
        registry: RoomRegistry,
        backbone: Arc<dyn Backbone>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            registry,
            backbone,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn backbone(&self) -> &Arc<dyn Backbone> {
        &self.backbone
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Handle a raw event from `sender`. Unknown names and malformed payloads
    /// are logged and dropped.
    pub async fn handle_raw(&self, sender: &Connection, name: &str, payload: Value) -> usize {
        match ClientEvent::parse(name, payload) {
            Ok(Some(event)) => self.handle(sender, event).await,
            Ok(None) => {
                debug!(connection_id = %sender.id, event = name, "Ignoring unknown event");
                0
            }
            Err(e) => {
                warn!(connection_id = %sender.id, event = name, reason = %e, "Dropping malformed event");
                0
            }
        }
    }

    /// Apply one event. Returns the number of local connections it was delivered to.
    pub async fn handle(&self, sender: &Connection, event: ClientEvent) -> usize {
        match event {
            ClientEvent::Join(room) => {
                self.registry.join(sender, &room);
                0
            }
            ClientEvent::Leave(room) => {
                self.registry.leave(&sender.id, &room);
                0
            }
            ClientEvent::Broadcast {
                kind,
                room,
                payload,
            } => self.broadcast(sender, &room, kind.name(), payload).await,
        }
    }

    async fn broadcast(&self, sender: &Connection, room: &Room, name: &str, payload: Value) -> usize {
        let outbound = OutboundEvent::new(name, payload);
        let sent = self.deliver_local(room, &sender.id, &outbound.to_packet());

        let envelope = Envelope {
            origin: self.instance_id.clone(),
            room: room.clone(),
            event: outbound.name,
            payload: outbound.payload,
            sender: sender.id.clone(),
        };
        if let Err(e) = self.backbone.publish(&envelope).await {
            warn!(
                error = %e,
                backbone = self.backbone.name(),
                room = %room,
                event = name,
                "Backbone publish failed, delivered locally only"
            );
        }

        debug!(connection_id = %sender.id, room = %room, event = name, sent_count = sent, "Event relayed");
        sent
    }

    /// Deliver an envelope received from another instance
    pub fn deliver_remote(&self, envelope: Envelope) -> usize {
        if envelope.origin == self.instance_id {
            return 0;
        }
        let packet = OutboundEvent::new(envelope.event.clone(), envelope.payload.clone()).to_packet();
        let sent = self.deliver_local(&envelope.room, &envelope.sender, &packet);
        debug!(
            origin = %envelope.origin,
            room = %envelope.room,
            event = %envelope.event,
            sent_count = sent,
            "Remote event delivered"
        );
        sent
    }

    fn deliver_local(&self, room: &Room, exclude: &str, packet: &EnginePacket) -> usize {
        let mut sent = 0;
        for member in self.registry.members_excluding(room, exclude) {
            match member.try_send(packet.clone()) {
                Ok(()) => sent += 1,
                Err(SendFailure::Full) => {
                    warn!(connection_id = %member.id, room = %room, "Outbound queue full, dropping event")
                }
                Err(SendFailure::Closed) => {
                    debug!(connection_id = %member.id, room = %room, "Connection closed, skipping")
                }
            }
        }
        sent
    }

    /// Handler to pass to [`Backbone::start`]
    pub fn to_handler(&self) -> EnvelopeHandler {
        let relay = self.clone();
        Arc::new(move |envelope| {
            relay.deliver_remote(envelope);
        })
    }
}
