//! In-memory transport for unit tests
//!
//! Each connect consumes one scripted [`Step`]; every request sent and every
//! host resolved is recorded for assertions.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::transport::{Connection, Transport, TransportError, TransportMode, RECEIVE_TIMEOUT};

/// What the peer does on one connection
#[derive(Debug, Clone)]
pub enum Step {
    /// Accept and answer with this text, then close
    Reply(&'static str),
    /// Refuse the connection
    Refuse,
    /// Accept but never answer
    TimeOut,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub host: String,
    pub port: u16,
    pub request_line: String,
    pub headers: Vec<String>,
}

pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    unresolvable: Vec<String>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    resolved: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            unresolvable: Vec::new(),
            requests: Arc::default(),
            resolved: Arc::default(),
            disconnects: Arc::default(),
        }
    }

    /// Makes resolution of `host` fail
    pub fn with_unresolvable(mut self, host: &str) -> Self {
        self.unresolvable.push(host.to_string());
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn resolved_hosts(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Shared handle on the request log, usable after the transport is boxed
    pub fn request_log(&self) -> Arc<Mutex<Vec<RecordedRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Shared handle on the resolve log, usable after the transport is boxed
    pub fn resolve_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.resolved)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Plain
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
        self.resolved.lock().unwrap().push(host.to_string());
        if self.unresolvable.iter().any(|h| h == host) {
            return Err(TransportError::NoAddresses {
                host: host.to_string(),
            });
        }
        Ok(vec![SocketAddr::from((Ipv4Addr::LOCALHOST, port))])
    }

    async fn connect_addrs(
        &self,
        host: &str,
        addrs: &[SocketAddr],
    ) -> Result<Box<dyn Connection>, TransportError> {
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Refuse);
        if let Step::Refuse = step {
            return Err(TransportError::Connect {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        Ok(Box::new(ScriptedConnection {
            host: host.to_string(),
            port: addrs.first().map(|a| a.port()).unwrap_or(0),
            step,
            answered: false,
            requests: Arc::clone(&self.requests),
            disconnects: Arc::clone(&self.disconnects),
        }))
    }
}

struct ScriptedConnection {
    host: String,
    port: u16,
    step: Step,
    answered: bool,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn mode(&self) -> TransportMode {
        TransportMode::Plain
    }

    async fn send(&mut self, request_line: &str, headers: &[String]) -> Result<(), TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            host: self.host.clone(),
            port: self.port,
            request_line: request_line.to_string(),
            headers: headers.to_vec(),
        });
        Ok(())
    }

    async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        match self.step {
            Step::Reply(text) if !self.answered => {
                self.answered = true;
                let bytes = text.as_bytes();
                Ok(bytes[..bytes.len().min(max_len)].to_vec())
            }
            Step::Reply(_) => Err(TransportError::ConnectionLost),
            Step::TimeOut | Step::Refuse => Err(TransportError::TimedOut(RECEIVE_TIMEOUT)),
        }
    }

    async fn disconnect(self: Box<Self>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
