//! Schedule TLV decode and next-fire-time evaluation (§4.5, §8/S6).
//!
//! Incoming schedule updates are base64 strings; decoded, they are a flat
//! tag-length-value stream. The TLV tag set is not carried by the
//! distillation (the original's `ayla_tlv` tag enum lives outside the
//! retrieved source), so it is defined here: a one-shot fire time, an
//! optional repeat interval for recurring schedules, and the embedded
//! property name/value pair to apply when the schedule fires, matching
//! the NAME-then-VALUE layout `sched_fire_schedule` walks in the
//! reference source.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};

use crate::error::{Error, ErrorKind, Result};
use crate::value::Value;

const TAG_UTC_TIME: u8 = 1;
const TAG_REPEAT_SECS: u8 = 2;
const TAG_NAME: u8 = 3;
const TAG_INT: u8 = 4;
const TAG_BOOL: u8 = 5;
const TAG_UTF8: u8 = 6;

/// One decoded TLV entry.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Tlv {
    tag: u8,
    value: Vec<u8>,
}

fn decode_tlvs(bytes: &[u8]) -> Result<Vec<Tlv>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if i + 2 > bytes.len() {
            return Err(Error::new(ErrorKind::Ipc(crate::error::IpcErrorKind::BadValue)));
        }
        let tag = bytes[i];
        let len = bytes[i + 1] as usize;
        let start = i + 2;
        let end = start + len;
        if end > bytes.len() {
            return Err(Error::new(ErrorKind::Ipc(crate::error::IpcErrorKind::BadValue)));
        }
        out.push(Tlv { tag, value: bytes[start..end].to_vec() });
        i = end;
    }
    Ok(out)
}

/// The property action a schedule fires, decoded once so the fire time can
/// be checked repeatedly without redecoding.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleAction {
    pub prop_name: String,
    pub value: Value,
}

/// A single decoded schedule (one-shot or recurring).
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    pub name: String,
    pub base64_val: String,
    pub arg: Option<serde_json::Value>,
    fire_at: DateTime<Utc>,
    repeat_secs: Option<i64>,
    action: ScheduleAction,
}

impl Schedule {
    /// Decodes a base64 TLV stream into a schedule (§4.5).
    pub fn decode(name: impl Into<String>, base64_val: impl Into<String>, arg: Option<serde_json::Value>) -> Result<Self> {
        let base64_val = base64_val.into();
        let raw = BASE64.decode(&base64_val).map_err(|_| Error::new(ErrorKind::Ipc(crate::error::IpcErrorKind::BadValue)))?;
        let tlvs = decode_tlvs(&raw)?;

        let mut fire_secs = None;
        let mut repeat_secs = None;
        let mut prop_name = None;
        let mut action_value = None;
        let mut iter = tlvs.into_iter();
        for tlv in iter.by_ref() {
            match tlv.tag {
                TAG_UTC_TIME => {
                    let bytes: [u8; 4] = tlv.value.as_slice().try_into().map_err(|_| bad_val())?;
                    fire_secs = Some(u32::from_be_bytes(bytes));
                }
                TAG_REPEAT_SECS => {
                    let bytes: [u8; 4] = tlv.value.as_slice().try_into().map_err(|_| bad_val())?;
                    repeat_secs = Some(u32::from_be_bytes(bytes) as i64);
                }
                TAG_NAME => {
                    prop_name = Some(String::from_utf8(tlv.value).map_err(|_| bad_val())?);
                }
                TAG_INT => {
                    let bytes: [u8; 4] = tlv.value.as_slice().try_into().map_err(|_| bad_val())?;
                    action_value = Some(Value::Integer(i32::from_be_bytes(bytes)));
                    break;
                }
                TAG_BOOL => {
                    let b = *tlv.value.first().ok_or_else(bad_val)?;
                    action_value = Some(Value::Boolean(b != 0));
                    break;
                }
                TAG_UTF8 => {
                    action_value = Some(Value::String(String::from_utf8(tlv.value).map_err(|_| bad_val())?));
                    break;
                }
                _ => {}
            }
        }

        let fire_secs = fire_secs.ok_or_else(bad_val)?;
        let prop_name = prop_name.ok_or_else(bad_val)?;
        let value = action_value.ok_or_else(bad_val)?;
        let fire_at = DateTime::<Utc>::from_timestamp(fire_secs as i64, 0).ok_or_else(bad_val)?;

        Ok(Self { name: name.into(), base64_val, arg, fire_at, repeat_secs, action: ScheduleAction { prop_name, value } })
    }

    /// Next UTC fire time (§4.5: "evaluated against the current UTC time to
    /// produce the next fire time").
    pub fn next_fire(&self) -> DateTime<Utc> {
        self.fire_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }

    /// Fires the schedule, returning the property action to apply as if a
    /// cloud-originated property update had arrived. For a recurring
    /// schedule, advances `fire_at` by the repeat interval so the next
    /// `is_due`/`next_fire` call picks up the following occurrence;
    /// one-shot schedules are dropped from the active set by the caller.
    pub fn fire(&mut self) -> ScheduleAction {
        let action = self.action.clone();
        if let Some(repeat) = self.repeat_secs {
            self.fire_at += chrono::Duration::seconds(repeat);
        }
        action
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat_secs.is_some()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({ "name": self.name, "value": self.base64_val });
        if let Some(arg) = &self.arg {
            obj["arg"] = arg.clone();
        }
        obj
    }
}

fn bad_val() -> Error {
    Error::new(ErrorKind::Ipc(crate::error::IpcErrorKind::BadValue))
}

/// Per-subsystem set of schedules, mirroring `sched_list`/`sched_run_all`:
/// tracks a name-keyed set and returns the earliest next fire time across
/// all of them.
#[derive(Default)]
pub struct ScheduleSet {
    schedules: std::collections::HashMap<String, Schedule>,
}

impl ScheduleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, schedule: Schedule) {
        self.schedules.insert(schedule.name.clone(), schedule);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.schedules.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Schedule> {
        self.schedules.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Schedule)> {
        self.schedules.iter().map(|(name, sched)| (name.as_str(), sched))
    }

    /// Fires every due schedule, dropping one-shot ones that fired and
    /// keeping recurring ones re-armed for their next interval. Returns
    /// `(name, action)` pairs in no particular order; the caller applies
    /// each as a cloud-originated property update (§8/S6).
    pub fn run_all(&mut self, now: DateTime<Utc>) -> Vec<(String, ScheduleAction)> {
        let mut fired = Vec::new();
        let mut to_drop = Vec::new();
        for (name, sched) in self.schedules.iter_mut() {
            if sched.is_due(now) {
                let action = sched.fire();
                fired.push((name.clone(), action));
                if !sched.is_recurring() {
                    to_drop.push(name.clone());
                }
            }
        }
        for name in to_drop {
            self.schedules.remove(&name);
        }
        fired
    }

    /// Earliest next fire time across all schedules, for arming the single
    /// schedule timer (§4.5 / `sched_setup_timer_for_next_event`).
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedules.values().map(|s| s.fire_at).min()
    }

    pub fn to_json(&self) -> Vec<serde_json::Value> {
        self.schedules.values().map(Schedule::to_json).collect()
    }
}

/// Builds a base64 TLV stream for a one-shot integer schedule; used by
/// tests and by glue code constructing schedules to push down.
pub fn encode_one_shot_int(fire_at: DateTime<Utc>, prop_name: &str, value: i32) -> String {
    let mut bytes = Vec::new();
    push_tlv(&mut bytes, TAG_UTC_TIME, &(fire_at.timestamp() as u32).to_be_bytes());
    push_tlv(&mut bytes, TAG_NAME, prop_name.as_bytes());
    push_tlv(&mut bytes, TAG_INT, &value.to_be_bytes());
    BASE64.encode(&bytes)
}

/// Builds a base64 TLV stream for a recurring integer schedule.
pub fn encode_recurring_int(first_fire_at: DateTime<Utc>, repeat_secs: u32, prop_name: &str, value: i32) -> String {
    let mut bytes = Vec::new();
    push_tlv(&mut bytes, TAG_UTC_TIME, &(first_fire_at.timestamp() as u32).to_be_bytes());
    push_tlv(&mut bytes, TAG_REPEAT_SECS, &repeat_secs.to_be_bytes());
    push_tlv(&mut bytes, TAG_NAME, prop_name.as_bytes());
    push_tlv(&mut bytes, TAG_INT, &value.to_be_bytes());
    BASE64.encode(&bytes)
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}
