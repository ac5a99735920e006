// Path: crates/qkd-module/src/runtime.rs
//! The module worker runtime (§4.6): reads a key (from the in-sync stash or
//! `pipe_in`), hands it to the module-specific [`Module::process`], and
//! forwards a surviving key to `pipe_out`. Wraps the state machine, stash,
//! synchronizer, endpoints and statistics that every pipeline stage shares.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use qkd_api::error::{CryptoError, Error};
use qkd_api::random::RandomSource;
use qkd_api::role::Role;
use qkd_connection::{Channel, EndpointKind, EndpointUrl, Listener};
use qkd_crypto::EvHash;
use qkd_telemetry::Statistics;
use qkd_types::{KeyRecord, MessageType};

use crate::config::RuntimeConfig;
use crate::stash::Stash;
use crate::state::{ModuleState, StateMachine};
use crate::sync;

/// The fallback sleep when `pipe_in` yields no key (§5 suspension points).
const PICK_FALLBACK: Duration = Duration::from_millis(50);

/// The module-specific behavior a pipeline stage plugs into the shared
/// runtime. `process` receives the key, its authenticator contexts, and
/// the peer channel (if paired) so it can run its own handshake.
pub trait Module: Send {
    /// Whether this key should be processed at all; a `false` silently
    /// drops it.
    fn accept(&mut self, _key: &KeyRecord) -> bool {
        true
    }

    /// Mutates `key` in place. Returning `Ok(true)` forwards it to
    /// `pipe_out`; `Ok(false)` drops it without forwarding. `Err` is fatal
    /// to the current cycle (logged, key dropped) unless it wraps an
    /// [`qkd_api::error::InvariantError`], which terminates the module.
    fn process(
        &mut self,
        key: &mut KeyRecord,
        in_ctx: &mut EvHash,
        out_ctx: &mut EvHash,
        peer: Option<&mut Channel>,
        random: &mut dyn RandomSource,
        timeout_ms: i64,
    ) -> Result<bool, Error>;
}

/// Restores the persisted authenticator context from a key's scheme string,
/// or mints a fresh one keyed from `random` if the key carries none yet.
fn context_from_scheme(scheme: &str, random: &mut dyn RandomSource) -> Result<EvHash, CryptoError> {
    if scheme.is_empty() {
        let mut key = [0u8; 4];
        random.fill_bytes(&mut key);
        EvHash::new(&key)
    } else {
        EvHash::from_scheme_string(scheme)
    }
}

/// Everything one pipeline-stage module instance owns at runtime.
pub struct ModuleRuntime<M: Module> {
    state: Arc<StateMachine>,
    stats: Arc<Statistics>,
    config: RuntimeConfig,
    role: Role,
    stash: Stash,
    module: M,
    pipe_in: Option<Channel>,
    pipe_out: Option<Channel>,
    peer: Option<Channel>,
    listener: Option<Listener>,
    random: Box<dyn RandomSource>,
    terminate_after: Option<u64>,
}

impl<M: Module> ModuleRuntime<M> {
    pub fn new(
        config: RuntimeConfig,
        role: Role,
        module: M,
        random: Box<dyn RandomSource>,
        module_id: &str,
    ) -> Result<Self, qkd_api::error::ConfigError> {
        let pipe_in = if config.url_pipe_in.is_empty() {
            None
        } else {
            let url = EndpointUrl::parse(&config.url_pipe_in, EndpointKind::PipeIn, module_id)?;
            Some(qkd_connection::connect(&url).map_err(|e| qkd_api::error::ConfigError::Invalid {
                key: "url_pipe_in".to_string(),
                reason: e.to_string(),
            })?)
        };
        let pipe_out = if config.url_pipe_out.is_empty() {
            None
        } else {
            let url = EndpointUrl::parse(&config.url_pipe_out, EndpointKind::PipeOut, module_id)?;
            Some(qkd_connection::connect(&url).map_err(|e| qkd_api::error::ConfigError::Invalid {
                key: "url_pipe_out".to_string(),
                reason: e.to_string(),
            })?)
        };

        let peer = match role {
            Role::Initiator if !config.url_peer.is_empty() => {
                let url = EndpointUrl::parse(&config.url_peer, EndpointKind::Peer, module_id)?;
                Some(qkd_connection::connect(&url).map_err(|e| qkd_api::error::ConfigError::Invalid {
                    key: "url_peer".to_string(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };

        let listener = match role {
            Role::Responder if !config.url_listen.is_empty() => {
                let url = EndpointUrl::parse(&config.url_listen, EndpointKind::Listen, module_id)?;
                Some(Listener::bind(&url).map_err(|e| qkd_api::error::ConfigError::Invalid {
                    key: "url_listen".to_string(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };

        let stash = Stash::new(config.synchronize_ttl);

        Ok(Self {
            state: Arc::new(StateMachine::new()),
            stats: Arc::new(Statistics::new()),
            stash,
            config,
            role,
            module,
            pipe_in,
            pipe_out,
            peer,
            listener,
            random,
            terminate_after: None,
        })
    }

    pub fn state(&self) -> Arc<StateMachine> {
        Arc::clone(&self.state)
    }

    pub fn stats(&self) -> Arc<Statistics> {
        Arc::clone(&self.stats)
    }

    pub fn set_terminate_after(&mut self, count: Option<u64>) {
        self.terminate_after = count;
    }

    /// Blocks until a peer connects on `listener`, replacing `self.peer`.
    /// Responder-only; a no-op if already paired or not listening.
    pub fn accept_peer(&mut self) -> Result<(), qkd_api::error::TransportError> {
        if self.peer.is_some() {
            return Ok(());
        }
        if let Some(listener) = &self.listener {
            self.peer = Some(listener.accept()?);
        }
        Ok(())
    }

    /// `run()`: `new -> ready`.
    pub fn run(&self) -> Result<(), qkd_api::error::InvariantError> {
        self.state.transition(ModuleState::Ready)
    }

    /// `resume()`: `ready -> running`.
    pub fn resume(&self) -> Result<(), qkd_api::error::InvariantError> {
        self.state.transition(ModuleState::Running)
    }

    /// `pause()`: `running -> ready`.
    pub fn pause(&self) -> Result<(), qkd_api::error::InvariantError> {
        self.state.transition(ModuleState::Ready)
    }

    /// `terminate()`: any -> `terminating`.
    pub fn terminate(&self) -> Result<(), qkd_api::error::InvariantError> {
        self.state.transition(ModuleState::Terminating)
    }

    /// Pulls the next key for processing: from the in-sync stash if
    /// synchronization is enabled, else straight from `pipe_in`.
    fn pick_next_key(&mut self) -> Result<KeyRecord, Error> {
        if self.config.synchronize_keys {
            if let Some(peer) = self.peer.as_mut() {
                let mut ctx = EvHash::new(&[0, 0, 0, 1]).map_err(Error::from)?;
                let mut in_ctx = EvHash::new(&[0, 0, 0, 1]).map_err(Error::from)?;
                let key = sync::tick(&mut self.stash, peer, self.role, &mut ctx, &mut in_ctx, self.config.timeout_network)?;
                return Ok(key);
            }
            return Ok(KeyRecord::null());
        }
        let Some(pipe_in) = self.pipe_in.as_mut() else {
            return Ok(KeyRecord::null());
        };
        let mut throwaway_ctx = EvHash::new(&[0, 0, 0, 1]).map_err(Error::from)?;
        match pipe_in.recv(MessageType::Data, &mut throwaway_ctx, self.config.timeout_pipe) {
            Ok(mut msg) => {
                let blob = msg.get_blob().map_err(|e| {
                    Error::from(qkd_api::error::ProtocolError::Malformed(e.to_string()))
                })?;
                KeyRecord::decode(&blob)
                    .map_err(|e| Error::from(qkd_api::error::ProtocolError::Malformed(e.to_string())))
            }
            Err(_) => Ok(KeyRecord::null()),
        }
    }

    fn forward_key(&mut self, key: &KeyRecord) -> Result<(), Error> {
        let Some(pipe_out) = self.pipe_out.as_mut() else {
            return Ok(());
        };
        let mut msg = qkd_types::Message::new(MessageType::Data);
        msg.put_blob(&key.encode());
        let mut throwaway_ctx = EvHash::new(&[0, 0, 0, 1])?;
        pipe_out.send(&msg, &mut throwaway_ctx, self.config.timeout_pipe).map_err(Error::from)
    }

    /// One worker iteration: pick a key, run it through the module, forward
    /// or drop it, update statistics. Returns `Ok(true)` if a key was
    /// forwarded downstream.
    pub fn run_cycle(&mut self) -> Result<bool, Error> {
        let mut key = self.pick_next_key()?;
        if key.is_null() {
            std::thread::sleep(PICK_FALLBACK);
            return Ok(false);
        }

        if !self.module.accept(&key) {
            debug!(key_id = key.id(), "module rejected key");
            return Ok(false);
        }

        self.stats.record_key_in(key.size() as u64 * 8);

        let mut in_ctx = context_from_scheme(key.incoming_scheme(), self.random.as_mut())?;
        let mut out_ctx = context_from_scheme(key.outgoing_scheme(), self.random.as_mut())?;

        let result = self.module.process(
            &mut key,
            &mut in_ctx,
            &mut out_ctx,
            self.peer.as_mut(),
            self.random.as_mut(),
            self.config.timeout_network,
        );

        match result {
            Ok(true) => {
                key.set_incoming_scheme(in_ctx.scheme_string());
                key.set_outgoing_scheme(out_ctx.scheme_string());
                self.forward_key(&key)?;
                self.stats.record_key_out(key.size() as u64 * 8);
                self.stats.record_disclosed_out(key.disclosed_bits());
                self.maybe_count_down();
                Ok(true)
            }
            Ok(false) => {
                debug!(key_id = key.id(), "cycle dropped key without error");
                Ok(false)
            }
            Err(Error::Invariant(e)) => {
                error!(error = %e, "invariant violation, terminating module");
                self.terminate().map_err(Error::from)?;
                Err(Error::Invariant(e))
            }
            Err(e) => {
                warn!(error = %e, key_id = key.id(), "cycle failed, key dropped");
                Ok(false)
            }
        }
    }

    fn maybe_count_down(&mut self) {
        if let Some(remaining) = self.terminate_after.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                if let Err(e) = self.terminate() {
                    error!(error = %e, "failed to transition to terminating after key budget exhausted");
                }
            }
        }
    }

    /// Drives the worker loop: waits for `running`, runs cycles, and
    /// returns once the state machine reaches `terminating`.
    pub fn run_worker_loop(&mut self) {
        loop {
            let state = self.state.wait_while_ready();
            if state == ModuleState::Terminating {
                break;
            }
            if let Err(e) = self.run_cycle() {
                if matches!(e, Error::Invariant(_)) {
                    break;
                }
            }
        }
        if let Err(e) = self.state.transition(ModuleState::Terminated) {
            error!(error = %e, "failed final transition to terminated");
        }
    }
}

