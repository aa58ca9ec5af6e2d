//! Property-based tests for inbound frame parsing and room resolution.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never causes a panic in `ClientMessage::parse`.
//! 2. Any integral `userId` is accepted by a presence frame, and the
//!    resulting room is the explicit one when non-empty.
//! 3. Signaling frames keep every extra field for forwarding.
//! 4. Room resolution always prefers explicit over bound over default.

use mdrelay_proto::inbound::{ClientMessage, SignalKind};
use mdrelay_proto::room::{RoomId, resolve_room};
use mdrelay_proto::UserId;
use proptest::prelude::*;
use serde_json::{Value, json};

/// Strategy for optional room names, including the empty string.
fn arb_room_name() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z0-9-]{0,12}")
}

proptest! {
    #[test]
    fn parse_never_panics(frame in ".{0,256}") {
        let _ = ClientMessage::parse(&frame);
    }

    #[test]
    fn parse_never_panics_on_typed_garbage(kind in "(message|presence|rtc:offer|rtc:answer|rtc:candidate|x)", body in "[ -~]{0,64}") {
        let frame = format!(r#"{{"type":"{kind}",{body}}}"#);
        let _ = ClientMessage::parse(&frame);
    }

    #[test]
    fn presence_accepts_any_integral_user(user in any::<i64>(), room in arb_room_name()) {
        let mut frame = json!({"type": "presence", "userId": user});
        if let Some(name) = &room {
            frame["roomId"] = Value::from(name.as_str());
        }
        let msg = ClientMessage::parse(&frame.to_string()).unwrap();
        let ClientMessage::Presence(presence) = msg else {
            panic!("expected presence");
        };
        prop_assert_eq!(presence.user_id, UserId::new(user));
        prop_assert_eq!(presence.room_id, room.and_then(RoomId::new));
    }

    #[test]
    fn signal_forward_preserves_extra_fields(
        to in any::<i64>(),
        extra in prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 0..6),
    ) {
        let mut frame = json!({"type": "rtc:offer", "to": to});
        for (key, value) in &extra {
            if key != "to" && key != "type" && key != "roomId" {
                frame[key.as_str()] = Value::from(value.as_str());
            }
        }
        let msg = ClientMessage::parse(&frame.to_string()).unwrap();
        let ClientMessage::Offer(signal) = msg else {
            panic!("expected offer");
        };
        let room = RoomId::default_room();
        let forwarded = signal.into_forward(SignalKind::Offer, &room);
        let mut expected = frame.clone();
        expected["roomId"] = Value::from("default");
        prop_assert_eq!(forwarded, expected);
    }

    #[test]
    fn resolution_priority(explicit in arb_room_name(), bound in arb_room_name(), default in "[a-z]{1,8}") {
        let explicit = explicit.and_then(RoomId::new);
        let bound = bound.and_then(RoomId::new);
        let default = RoomId::new(default).unwrap();
        let resolved = resolve_room(explicit.as_ref(), bound.as_ref(), &default);

        let expected = explicit.or(bound).unwrap_or(default);
        prop_assert!(!resolved.as_str().is_empty());
        prop_assert_eq!(resolved, expected);
    }
}
