//! Correlation of queued ops with the cloud-client peer's confirm/nak
//! replies (§4.4), exercised purely through `Poq`'s public surface.

use gwcore::poq::{CloudErr, ConfirmResult, Dests, NakResult, OpKind, OpOptions, Poq, PropRef};
use gwcore::value::Value;
use std::sync::{Arc, Mutex};

fn prop(name: &str) -> PropRef {
    PropRef { address: "AA:BB".into(), subdevice: "00".into(), template: "batt".into(), name: name.into() }
}

#[test]
fn two_property_sends_correlate_to_their_own_request_ids() {
    let mut poq = Poq::new();
    let seen: Arc<Mutex<Vec<(u64, bool)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut ids = Vec::new();
    for name in ["level", "charging"] {
        let seen = seen.clone();
        let id = poq.enqueue_with_callbacks(
            OpKind::PropertySend,
            Some(prop(name)),
            Some(Value::Integer(1)),
            OpOptions::default(),
            Some(Box::new(move |r: ConfirmResult| seen.lock().unwrap().push((0, r.success)))),
            None,
        );
        ids.push(id);
    }
    assert_ne!(ids[0], ids[1], "each enqueue gets a distinct request id");

    let sent = poq.poll();
    assert_eq!(sent.len(), 2);
    assert_eq!(poq.awaiting_confirm_len(), 2);

    // Replies arrive out of order; each must resolve its own op only.
    poq.confirm_true(ids[1]);
    assert_eq!(poq.awaiting_confirm_len(), 1);
    poq.confirm_false(ids[0], CloudErr::App, Dests::ADS);
    assert_eq!(poq.awaiting_confirm_len(), 0);
}

#[test]
fn nak_invokes_on_nak_not_on_confirm() {
    let mut poq = Poq::new();
    let confirm_called = Arc::new(Mutex::new(false));
    let nak_err: Arc<Mutex<Option<CloudErr>>> = Arc::new(Mutex::new(None));

    let confirm_flag = confirm_called.clone();
    let nak_flag = nak_err.clone();
    let id = poq.enqueue_with_callbacks(
        OpKind::PropertySend,
        Some(prop("level")),
        Some(Value::Integer(1)),
        OpOptions::default(),
        Some(Box::new(move |_: ConfirmResult| *confirm_flag.lock().unwrap() = true)),
        Some(Box::new(move |r: NakResult| *nak_flag.lock().unwrap() = Some(r.err))),
    );
    poq.poll();

    poq.nak(id, CloudErr::Conn);

    assert!(!*confirm_called.lock().unwrap());
    assert_eq!(*nak_err.lock().unwrap(), Some(CloudErr::Conn));
    assert_eq!(poq.awaiting_confirm_len(), 0);
}

#[test]
fn reply_to_an_unknown_request_id_is_a_silent_no_op() {
    let mut poq = Poq::new();
    poq.enqueue(OpKind::PropertySend, Some(prop("level")), Some(Value::Integer(1)), OpOptions::default());
    poq.poll();

    // A stale or duplicate reply for an id nothing is waiting on must not
    // panic and must not disturb the op that is actually pending.
    poq.confirm_true(999);
    assert_eq!(poq.awaiting_confirm_len(), 1);
}

#[test]
fn ops_not_requiring_confirmation_never_enter_the_awaiting_table() {
    let mut poq = Poq::new();
    poq.enqueue(OpKind::Ack, None, None, OpOptions::default());
    poq.enqueue(OpKind::DatapointSend, Some(prop("level")), Some(Value::Integer(1)), OpOptions::default());
    let sent = poq.poll();

    assert_eq!(sent.len(), 2);
    assert_eq!(poq.awaiting_confirm_len(), 0, "neither op forces confirmation nor requested it");
}

#[test]
fn explicit_confirm_required_tracks_even_a_normally_fire_and_forget_kind() {
    let mut poq = Poq::new();
    let mut opts = OpOptions::default();
    opts.confirm_required = true;
    let id = poq.enqueue(OpKind::DatapointSend, Some(prop("level")), Some(Value::Integer(1)), opts);
    poq.poll();
    assert_eq!(poq.awaiting_confirm_len(), 1);

    poq.confirm_true(id);
    assert_eq!(poq.awaiting_confirm_len(), 0);
}
