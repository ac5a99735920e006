// Path: crates/qkd-sifting-bb84/src/bin/qkd-sifting-bb84.rs
//! Standalone BB84 sifting module binary. Takes its configuration as CLI
//! flags rather than the XML pipeline launcher format (§6: "the core does
//! not prescribe this format beyond accepting startup options that the
//! launcher passes through").

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use clap::Parser;

use qkd_api::role::Role;
use qkd_module::{ModuleRuntime, RuntimeConfig};
use qkd_sifting_bb84::{Bb84Config, Bb84Sifting};

#[derive(Parser, Debug)]
#[command(name = "qkd-sifting-bb84", about = "BB84 sifting module with optional QAuth basis-exchange authentication")]
struct Args {
    /// Module id, used as the option-map prefix segment (`module.<id>.*`).
    #[arg(long, default_value = "1")]
    module_id: String,

    /// `alice` (initiator) or `bob` (responder).
    #[arg(long)]
    role: String,

    #[arg(long, default_value = "")]
    pipe_in: String,
    #[arg(long, default_value = "")]
    pipe_out: String,
    #[arg(long, default_value = "")]
    peer: String,
    #[arg(long, default_value = "")]
    listen: String,
    #[arg(long, default_value = "")]
    random_url: String,

    #[arg(long, default_value_t = false)]
    synchronize_keys: bool,
    #[arg(long, default_value_t = 10.0)]
    synchronize_ttl: f64,
    #[arg(long, default_value_t = -1)]
    timeout_network: i64,
    #[arg(long, default_value_t = -1)]
    timeout_pipe: i64,

    #[arg(long, default_value_t = 1024)]
    raw_key_length: usize,
    #[arg(long, default_value_t = false)]
    qauth: bool,
    #[arg(long, default_value_t = 16)]
    qauth_modulus: u32,
    #[arg(long, default_value = "")]
    key_id_pattern: String,

    /// Terminate after this many keys have been forwarded; unset runs forever.
    #[arg(long)]
    terminate_after: Option<u64>,
}

fn role_from_str(s: &str) -> Result<Role> {
    match s {
        "alice" => Ok(Role::Initiator),
        "bob" => Ok(Role::Responder),
        other => Err(anyhow!("role must be \"alice\" or \"bob\", got {other:?}")),
    }
}

fn build_options(args: &Args, role: Role) -> BTreeMap<String, String> {
    let pfx = format!("module.{}", args.module_id);
    let segment = role.config_segment();
    let mut options = BTreeMap::new();
    options.insert(format!("{pfx}.{segment}.url_pipe_in"), args.pipe_in.clone());
    options.insert(format!("{pfx}.{segment}.url_pipe_out"), args.pipe_out.clone());
    options.insert(format!("{pfx}.{segment}.url_peer"), args.peer.clone());
    options.insert(format!("{pfx}.{segment}.url_listen"), args.listen.clone());
    options.insert(format!("{pfx}.random_url"), args.random_url.clone());
    options.insert(format!("{pfx}.synchronize_keys"), args.synchronize_keys.to_string());
    options.insert(format!("{pfx}.synchronize_ttl"), args.synchronize_ttl.to_string());
    options.insert(format!("{pfx}.timeout_network"), args.timeout_network.to_string());
    options.insert(format!("{pfx}.timeout_pipe"), args.timeout_pipe.to_string());
    options.insert(format!("{pfx}.raw_key_length"), args.raw_key_length.to_string());
    options.insert(format!("{pfx}.qauth"), args.qauth.to_string());
    options.insert(format!("{pfx}.qauth_modulus"), args.qauth_modulus.to_string());
    options.insert(format!("{pfx}.key_id_pattern"), args.key_id_pattern.clone());
    options
}

fn main() -> Result<()> {
    qkd_telemetry::init_tracing()?;

    let args = Args::parse();
    let role = role_from_str(&args.role)?;
    let pfx = format!("module.{}", args.module_id);
    let options = build_options(&args, role);

    let runtime_config = RuntimeConfig::resolve(&options, &pfx, role)?;
    for key in RuntimeConfig::unrecognized_keys(&options, &pfx, role) {
        tracing::warn!(key, "unrecognized configuration option");
    }
    let bb84_config = Bb84Config::resolve(&options, &pfx, role)?;
    let random = qkd_crypto::random::from_url(&runtime_config.random_url)?;

    let module = Bb84Sifting::new(role, bb84_config);
    let mut runtime = ModuleRuntime::new(runtime_config, role, module, random, &args.module_id)?;
    runtime.set_terminate_after(args.terminate_after);

    runtime.run()?;
    if role.is_responder() {
        runtime.accept_peer()?;
    }
    runtime.resume()?;

    tracing::info!(module_id = %args.module_id, role = %args.role, "bb84 sifting module running");
    runtime.run_worker_loop();
    Ok(())
}
