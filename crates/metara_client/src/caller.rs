//! The remote-caller boundary.
//!
//! Everything below this trait (HTTP, XML-RPC encoding, connection
//! pooling) is out of scope. Implementations deliver already-decoded
//! [`Value`]s or raise a transport error. Calls are blocking; there is
//! no retry at this layer.

use crate::error::{ClientError, ClientResult};
use metara_wire::Value;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Remote procedure names consumed by the data factory.
pub mod procs {
    /// Fetches the session owner's user record.
    pub const GET_USER_STATE: &str = "getUserState";
    /// Counts records matching a filter map.
    pub const COUNT_OBJECTS: &str = "countObjects";
    /// Loads one record by primary key.
    pub const LOAD_OBJECT: &str = "loadObject";
    /// Retrieves the first record matching criteria.
    pub const RETRIEVE_OBJECT: &str = "retrieveObject";
    /// Retrieves every record matching criteria.
    pub const RETRIEVE_OBJECTS: &str = "retrieveObjects";
    /// Persists one record.
    pub const UPDATE_OBJECT: &str = "updateObject";
    /// Persists an ordered batch atomically.
    pub const UPDATE_OBJECTS: &str = "updateObjects";
}

/// Blocking request/response transport with session management.
///
/// `dispatch` is the call shape every data-factory operation uses: a
/// named remote procedure with the session key prepended to its
/// arguments. `invoke` is the raw form underneath it.
pub trait RemoteCaller: Send + Sync {
    /// Performs a raw remote call.
    fn invoke(&self, procedure: &str, args: Vec<Value>) -> ClientResult<Value>;

    /// Opens a session.
    fn login(&self, username: &str, password: &str) -> ClientResult<()>;

    /// Closes the session.
    fn logout(&self) -> ClientResult<()>;

    /// The current session key.
    fn session_key(&self) -> ClientResult<String>;

    /// Starts server-side profiling.
    fn profiling_start(&self) -> ClientResult<()>;

    /// Stops server-side profiling.
    fn profiling_stop(&self) -> ClientResult<()>;

    /// Clears accumulated profiling data.
    fn profiling_reset(&self) -> ClientResult<()>;

    /// Reads accumulated profiling data.
    fn profiling_read(&self) -> ClientResult<Value>;

    /// Performs a named remote call with the session key prepended.
    fn dispatch(&self, procedure: &str, args: Vec<Value>) -> ClientResult<Value> {
        let key = self.session_key()?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Text(key));
        full.extend(args);
        self.invoke(procedure, full)
    }

    /// Dispatches a call whose result must be an integer or null.
    fn dispatch_integer(&self, procedure: &str, args: Vec<Value>) -> ClientResult<Option<i64>> {
        match self.dispatch(procedure, args)? {
            Value::Null => Ok(None),
            Value::Int(n) => Ok(Some(n)),
            other => Err(ClientError::protocol(format!(
                "{procedure} returned {}, expected an integer",
                other.kind()
            ))),
        }
    }
}

/// One call recorded by [`MockCaller`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The invoked procedure.
    pub procedure: String,
    /// The full argument list as invoked (session key included).
    pub args: Vec<Value>,
}

/// A scriptable caller for tests.
///
/// Responses are queued per procedure and consumed in order; every
/// invocation is recorded for assertions about outgoing payloads.
#[derive(Debug, Default)]
pub struct MockCaller {
    session: Mutex<Option<String>>,
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
    log: Mutex<Vec<RecordedCall>>,
    profiling_active: Mutex<bool>,
}

impl MockCaller {
    /// Creates a mock with an open session.
    pub fn new() -> Self {
        Self {
            session: Mutex::new(Some("mock-session".to_string())),
            ..Self::default()
        }
    }

    /// Queues `response` for the next call to `procedure`.
    pub fn enqueue(&self, procedure: &str, response: Value) {
        self.responses
            .lock()
            .entry(procedure.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.lock().clone()
    }

    /// Number of transport invocations so far.
    pub fn call_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Calls recorded against one procedure.
    pub fn calls_to(&self, procedure: &str) -> Vec<RecordedCall> {
        self.log
            .lock()
            .iter()
            .filter(|c| c.procedure == procedure)
            .cloned()
            .collect()
    }
}

impl RemoteCaller for MockCaller {
    fn invoke(&self, procedure: &str, args: Vec<Value>) -> ClientResult<Value> {
        self.log.lock().push(RecordedCall {
            procedure: procedure.to_string(),
            args,
        });

        self.responses
            .lock()
            .get_mut(procedure)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| {
                ClientError::protocol(format!("no scripted response for {procedure}"))
            })
    }

    fn login(&self, username: &str, _password: &str) -> ClientResult<()> {
        *self.session.lock() = Some(format!("session-{username}"));
        Ok(())
    }

    fn logout(&self) -> ClientResult<()> {
        *self.session.lock() = None;
        Ok(())
    }

    fn session_key(&self) -> ClientResult<String> {
        self.session
            .lock()
            .clone()
            .ok_or_else(|| ClientError::transport("no open session"))
    }

    fn profiling_start(&self) -> ClientResult<()> {
        *self.profiling_active.lock() = true;
        Ok(())
    }

    fn profiling_stop(&self) -> ClientResult<()> {
        *self.profiling_active.lock() = false;
        Ok(())
    }

    fn profiling_reset(&self) -> ClientResult<()> {
        Ok(())
    }

    fn profiling_read(&self) -> ClientResult<Value> {
        Ok(Value::Map(vec![(
            "active".to_string(),
            Value::Bool(*self.profiling_active.lock()),
        )]))
    }
}
