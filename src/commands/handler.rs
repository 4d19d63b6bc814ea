//! Command Evaluation
//!
//! The only module that couples the codec to the store. A decoded request
//! frame (an Array of Bulk Strings) becomes a [`Command`] — uppercased
//! verb plus byte-string arguments — which is dispatched to one handler
//! per verb. Every handler is synchronous and borrows the store for the
//! duration of one call only, so evaluation never spans a suspension
//! point and replies come out in arrival order per connection.
//!
//! Supported verbs: PING, ECHO, TIME, SET (with `EX <seconds>`), GET,
//! TTL, DEL, EXPIRE. Command errors (arity, unknown verb, bad integers,
//! bad options) produce an Error frame and leave the connection open.

use crate::protocol::RespValue;
use crate::storage::store::{now_ms, Entry, Store, Value, NO_EXPIRY};
use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;

/// One parsed request: verb plus ordered arguments. Consumed by the
/// evaluator, discarded after one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Uppercased ASCII verb.
    pub verb: String,
    pub args: Vec<Bytes>,
}

impl Command {
    /// Builds a command from a decoded top-level frame.
    ///
    /// The frame must be a non-empty Array whose elements carry byte
    /// payloads; element 0 is the verb, matched case-insensitively.
    /// Returns the error reply to send when the shape is wrong.
    pub fn from_frame(frame: RespValue) -> Result<Self, RespValue> {
        let elements = match frame {
            RespValue::Array(elements) => elements,
            _ => return Err(RespValue::error("ERR invalid command format")),
        };

        if elements.is_empty() {
            return Err(RespValue::error("ERR empty command"));
        }

        let verb_bytes = elements[0]
            .as_bytes()
            .ok_or_else(|| RespValue::error("ERR invalid command name"))?;
        let verb = std::str::from_utf8(&verb_bytes)
            .map_err(|_| RespValue::error("ERR invalid command name"))?
            .to_uppercase();

        let mut args = Vec::with_capacity(elements.len() - 1);
        for element in &elements[1..] {
            match element.as_bytes() {
                Some(bytes) => args.push(bytes),
                None => return Err(RespValue::error("ERR invalid command format")),
            }
        }

        Ok(Command { verb, args })
    }
}

/// Dispatches parsed commands against the shared key space.
///
/// Cheap to clone: every connection handler carries one, all pointing at
/// the same store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Rc<RefCell<Store>>,
}

impl CommandHandler {
    pub fn new(store: Rc<RefCell<Store>>) -> Self {
        Self { store }
    }

    /// Evaluates one decoded request frame and returns the reply frame.
    pub fn execute(&self, frame: RespValue) -> RespValue {
        let command = match Command::from_frame(frame) {
            Ok(command) => command,
            Err(reply) => return reply,
        };

        match command.verb.as_str() {
            "PING" => self.cmd_ping(&command),
            "ECHO" => self.cmd_echo(&command),
            "TIME" => self.cmd_time(&command),
            "SET" => self.cmd_set(&command),
            "GET" => self.cmd_get(&command),
            "TTL" => self.cmd_ttl(&command),
            "DEL" => self.cmd_del(&command),
            "EXPIRE" => self.cmd_expire(&command),
            _ => RespValue::error(format!("ERR unknown command '{}'", command.verb)),
        }
    }

    /// PING [message] — bare PING answers with a simple string, PING with
    /// an argument echoes it as a bulk.
    fn cmd_ping(&self, command: &Command) -> RespValue {
        match command.args.len() {
            0 => RespValue::pong(),
            1 => RespValue::bulk_string(command.args[0].clone()),
            _ => arity_error(&command.verb),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, command: &Command) -> RespValue {
        if command.args.len() != 1 {
            return arity_error(&command.verb);
        }
        RespValue::bulk_string(command.args[0].clone())
    }

    /// TIME — two bulks: Unix seconds and the microseconds of the current
    /// second (0..=999_999), not microseconds since the epoch.
    fn cmd_time(&self, command: &Command) -> RespValue {
        if !command.args.is_empty() {
            return arity_error(&command.verb);
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(std::time::Duration::ZERO);

        RespValue::array(vec![
            RespValue::bulk_string(Bytes::from(now.as_secs().to_string())),
            RespValue::bulk_string(Bytes::from(now.subsec_micros().to_string())),
        ])
    }

    /// SET key value [EX seconds]
    fn cmd_set(&self, command: &Command) -> RespValue {
        if command.args.len() < 2 {
            return arity_error(&command.verb);
        }

        let key = command.args[0].clone();
        let value = command.args[1].clone();
        let mut ttl_ms: i64 = NO_EXPIRY;

        let mut i = 2;
        while i < command.args.len() {
            let option = match std::str::from_utf8(&command.args[i]) {
                Ok(s) => s.to_uppercase(),
                Err(_) => return RespValue::error("ERR syntax error"),
            };

            match option.as_str() {
                "EX" => {
                    i += 1;
                    if i == command.args.len() {
                        return RespValue::error("ERR syntax error");
                    }
                    let seconds = match parse_integer(&command.args[i]) {
                        Some(n) => n,
                        None => {
                            return RespValue::error(
                                "ERR value is not an integer or out of range",
                            )
                        }
                    };
                    ttl_ms = seconds.saturating_mul(1000);
                }
                _ => return RespValue::error("ERR syntax error"),
            }
            i += 1;
        }

        self.store
            .borrow_mut()
            .put(key, Entry::expiring(Value::String(value), ttl_ms));
        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&self, command: &Command) -> RespValue {
        if command.args.len() != 1 {
            return arity_error(&command.verb);
        }

        match self.store.borrow_mut().get(&command.args[0]) {
            Some(payload) => RespValue::bulk_string(payload),
            None => RespValue::null(),
        }
    }

    /// TTL key — -2 absent or expired, -1 immortal, else remaining whole
    /// seconds.
    fn cmd_ttl(&self, command: &Command) -> RespValue {
        if command.args.len() != 1 {
            return arity_error(&command.verb);
        }

        let mut store = self.store.borrow_mut();
        match store.live_entry(&command.args[0]) {
            None => RespValue::integer(-2),
            Some(entry) if entry.expires_at_ms == NO_EXPIRY => RespValue::integer(-1),
            Some(entry) => {
                let remaining_ms = entry.expires_at_ms - now_ms();
                if remaining_ms <= 0 {
                    RespValue::integer(-2)
                } else {
                    // Round up so TTL immediately after `EX n` reads n,
                    // not n-1 because a millisecond already elapsed.
                    RespValue::integer((remaining_ms + 999) / 1000)
                }
            }
        }
    }

    /// DEL key [key ...] — replies with the number actually removed.
    fn cmd_del(&self, command: &Command) -> RespValue {
        if command.args.is_empty() {
            return arity_error(&command.verb);
        }

        let mut store = self.store.borrow_mut();
        let removed = command
            .args
            .iter()
            .filter(|key| store.del(key))
            .count();
        RespValue::integer(removed as i64)
    }

    /// EXPIRE key seconds — 1 if the deadline was set, 0 if the key is
    /// absent. Never creates the key.
    fn cmd_expire(&self, command: &Command) -> RespValue {
        if command.args.len() != 2 {
            return arity_error(&command.verb);
        }

        let seconds = match parse_integer(&command.args[1]) {
            Some(n) => n,
            None => return RespValue::error("ERR value is not an integer or out of range"),
        };

        let deadline_ms = now_ms() + seconds.saturating_mul(1000);
        if self.store.borrow_mut().set_expiry(&command.args[0], deadline_ms) {
            RespValue::integer(1)
        } else {
            RespValue::integer(0)
        }
    }
}

fn arity_error(verb: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        verb
    ))
}

fn parse_integer(bytes: &Bytes) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
