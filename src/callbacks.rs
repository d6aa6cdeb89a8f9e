// ===============================
// src/callbacks.rs
// ===============================
//
// Callback-channel responses come back wrapped as `name(<json>)`. Each request
// registers a unique name here; the inbound body is handed to `deliver`,
// which resolves the matching pending entry. The entry is removed when its
// `PendingCallback` is dropped, whichever way the request ended.
//
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ahash::AHashMap as HashMap;
use rand::Rng;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::metrics::PENDING_CALLBACKS;

pub struct CallbackRegistry {
    prefix: String,
    issued: AtomicU64,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl CallbackRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: sanitize_prefix(&prefix.into()),
            issued: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve a callback name for request `req_id`.
    pub fn register(&self, req_id: u64) -> PendingCallback<'_> {
        let seq = self.issued.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::thread_rng().gen();
        let name = format!("{}_{}_{}_{:08x}", self.prefix, req_id, seq, salt);
        let (tx, rx) = oneshot::channel();
        let n = {
            let mut map = self.lock();
            map.insert(name.clone(), tx);
            map.len()
        };
        PENDING_CALLBACKS.set(n as i64);
        PendingCallback { registry: self, name, rx }
    }

    /// Route a wrapped response body to its pending request.
    pub fn deliver(&self, body: &str) -> Result<(), String> {
        let (name, payload) = unwrap_callback(body)?;
        let tx = self.lock().remove(&name);
        match tx {
            Some(tx) => {
                // receiver hilang = request sudah selesai/dibatalkan, abaikan
                let _ = tx.send(payload);
                Ok(())
            }
            None => Err(format!("no pending callback named {name}")),
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, name: &str) {
        let n = {
            let mut map = self.lock();
            map.remove(name);
            map.len()
        };
        PENDING_CALLBACKS.set(n as i64);
    }
}

/// A reserved callback name. Dropping it releases the registry entry.
pub struct PendingCallback<'a> {
    registry: &'a CallbackRegistry,
    name: String,
    rx: oneshot::Receiver<Value>,
}

impl PendingCallback<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload delivered for this name, if any arrived.
    pub fn take(&mut self) -> Result<Value, String> {
        self.rx
            .try_recv()
            .map_err(|_| format!("response did not address callback {}", self.name))
    }
}

impl Drop for PendingCallback<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    let clean: String = prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if clean.is_empty() {
        "ledgerCallback".to_string()
    } else {
        clean
    }
}

fn is_callback_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.')
}

/// `/**/ name({...});` -> (name, payload)
pub fn unwrap_callback(body: &str) -> Result<(String, Value), String> {
    let s = body.trim();
    let s = s.strip_prefix("/**/").unwrap_or(s).trim();
    let s = s.strip_suffix(';').unwrap_or(s).trim_end();

    let open = s.find('(').ok_or_else(|| "callback body has no '('".to_string())?;
    let name = s[..open].trim();
    if !is_callback_name(name) {
        return Err(format!("bad callback name {name:?}"));
    }
    let inner = s[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| "callback body is not closed".to_string())?;
    let payload = serde_json::from_str::<Value>(inner).map_err(|e| format!("callback payload: {e}"))?;
    Ok((name.to_string(), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_common_shapes() {
        let (n, v) = unwrap_callback("cb_1({\"success\":true})").unwrap();
        assert_eq!(n, "cb_1");
        assert_eq!(v, json!({"success": true}));

        let (n, v) = unwrap_callback("/**/ cb_2([1,2]);\n").unwrap();
        assert_eq!(n, "cb_2");
        assert_eq!(v, json!([1, 2]));

        assert!(unwrap_callback("{\"success\":true}").is_err());
        assert!(unwrap_callback("cb_3({\"a\":1}").is_err());
        assert!(unwrap_callback("alert(1); cb({})").is_err());
    }

    #[test]
    fn deliver_resolves_the_named_request_only() {
        let reg = CallbackRegistry::new("ledgerCallback");
        let mut a = reg.register(1);
        let mut b = reg.register(2);
        assert_ne!(a.name(), b.name());
        assert_eq!(reg.pending(), 2);

        let body = format!("{}([{{\"name\":\"x\"}}])", b.name());
        reg.deliver(&body).unwrap();
        assert_eq!(b.take().unwrap(), json!([{"name": "x"}]));
        assert!(a.take().is_err());
        assert!(reg.deliver(&body).is_err());
    }

    #[test]
    fn entries_are_released_on_drop() {
        let reg = CallbackRegistry::new("bad prefix!");
        {
            let p = reg.register(9);
            assert!(p.name().starts_with("badprefix_9_"));
            assert_eq!(reg.pending(), 1);
        }
        assert_eq!(reg.pending(), 0);
    }
}
