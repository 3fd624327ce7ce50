//! Demo/benchmark binary (C11): drives the engine through a handful of
//! canned scenarios via the public `Engine` API. Not a circuit-description
//! front-end — there is no QASM (or any other) input format; the scenarios
//! are fixed and hard-coded, in the same spirit as the teacher's `qcu_host`
//! `gen`/`run`/`stream` subcommands driving fixed synthetic workloads.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evbdd_bench::{gates, stats::LatencyStats};
use evbdd_core::{Edge, Engine, EngineConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bell state: |00>, H on qubit 0, CX(0,1).
    Bell,
    /// GHZ-n: |0...0>, H on qubit 0, CX(0,1), CX(1,2), ..., CX(n-2,n-1).
    Ghz {
        #[arg(default_value_t = 3)]
        n: u16,
    },
    /// Random 2-qubit gate soak test, exercising the GC barrier under load.
    Soak {
        #[arg(long, default_value_t = 10_000)]
        gates: usize,
        #[arg(long, default_value_t = 10)]
        qubits: u16,
        #[arg(long, default_value_t = 0.1)]
        gc_threshold: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Bell => run_bell()?,
        Commands::Ghz { n } => run_ghz(n)?,
        Commands::Soak { gates: gate_count, qubits, gc_threshold, seed } => {
            run_soak(gate_count, qubits, gc_threshold, seed)?
        }
    }
    Ok(())
}

fn new_engine() -> (Engine, gates::GateSet) {
    let (constants, hook) = gates::new_constants_cell();
    let engine = Engine::init(EngineConfig { reinit_entries_hook: hook, ..EngineConfig::default() });
    let gate_set = gates::GateSet::install(&engine, &constants);
    (engine, gate_set)
}

/// `state` and the gate matrix `embed_1q`/`embed_cnot_adjacent` return are
/// both ordinary, unprotected edges — any call the engine makes between
/// producing one and consuming it in `matvec` (including the auto-GC check
/// at the start of that very `matvec` call) can invalidate them unless they
/// are pinned as roots for the duration. `protect`/`unprotect` bracket that
/// window explicitly rather than relying on them happening to survive.
fn apply_1q(engine: &Engine, gates: &gates::GateSet, state: Edge, name: &str, qubit: u16, n: u16) -> Result<Edge> {
    let state_root = engine.protect(state);
    let result = (|| -> Result<Edge> {
        let gate = gates.edge(engine, name).context("unknown gate")?;
        let embedded = gates::embed_1q(engine, gate, qubit, n)?;
        let embedded_root = engine.protect(embedded);
        let out = engine.matvec(engine.protected_value(&embedded_root), engine.protected_value(&state_root), n);
        engine.unprotect(&embedded_root);
        Ok(out?)
    })();
    engine.unprotect(&state_root);
    result
}

fn apply_cnot(engine: &Engine, gates: &gates::GateSet, state: Edge, control: u16, n: u16) -> Result<Edge> {
    let state_root = engine.protect(state);
    let result = (|| -> Result<Edge> {
        let cnot = engine.protected_value(&gates.cnot);
        let embedded = gates::embed_cnot_adjacent(engine, cnot, control, n)?;
        let embedded_root = engine.protect(embedded);
        let out = engine.matvec(engine.protected_value(&embedded_root), engine.protected_value(&state_root), n);
        engine.unprotect(&embedded_root);
        Ok(out?)
    })();
    engine.unprotect(&state_root);
    result
}

fn run_bell() -> Result<()> {
    let (engine, gate_set) = new_engine();
    let n = 2u16;
    let state0 = engine.make_basis_state(&[false, false])?;
    let after_h = apply_1q(&engine, &gate_set, state0, "H", 0, n)?;
    let bell = apply_cnot(&engine, &gate_set, after_h, 0, n)?;

    println!("Bell state:");
    print_amplitudes(&engine, bell, n);
    println!("countnodes = {}", engine.countnodes(bell));
    println!("prob_sum   = {:.12}", engine.prob_sum(bell, 0, n));
    Ok(())
}

fn run_ghz(n: u16) -> Result<()> {
    anyhow::ensure!(n >= 2, "GHZ scenario needs at least 2 qubits");
    let (engine, gate_set) = new_engine();
    let bits = vec![false; n as usize];
    let mut state = engine.make_basis_state(&bits)?;
    state = apply_1q(&engine, &gate_set, state, "H", 0, n)?;
    for q in 0..n - 1 {
        state = apply_cnot(&engine, &gate_set, state, q, n)?;
    }

    println!("GHZ-{n} state:");
    print_amplitudes(&engine, state, n);
    println!("countnodes = {}", engine.countnodes(state));
    println!("prob_sum   = {:.12}", engine.prob_sum(state, 0, n));
    Ok(())
}

fn print_amplitudes(engine: &Engine, state: Edge, n: u16) {
    for mask in 0u32..(1u32 << n) {
        let bits: Vec<bool> = (0..n).map(|i| (mask >> i) & 1 == 1).collect();
        let amp = engine.get_value(state, &bits);
        if amp != evbdd_core::Complex::ZERO {
            let label: String = bits.iter().rev().map(|&b| if b { '1' } else { '0' }).collect();
            println!("  |{label}> = {amp:?}");
        }
    }
}

/// Picks a uniformly random single-qubit gate name or a CNOT on a random
/// adjacent pair, mirroring the teacher's hand-rolled-xorshift generator
/// idiom: this is synthetic load generation, not something that needs a
/// cryptographically strong or even a process-wide shared RNG.
fn random_gate(rng: &mut StdRng, qubits: u16) -> (bool, &'static str, u16) {
    const ONE_Q: [&str; 7] = ["H", "X", "Y", "Z", "S", "T", "SX"];
    if qubits >= 2 && rng.gen_bool(0.5) {
        let control = rng.gen_range(0..qubits - 1);
        (true, "CNOT", control)
    } else {
        let gate = ONE_Q[rng.gen_range(0..ONE_Q.len())];
        let qubit = rng.gen_range(0..qubits);
        (false, gate, qubit)
    }
}

fn run_soak(gate_count: usize, qubits: u16, gc_threshold: f64, seed: u64) -> Result<()> {
    anyhow::ensure!(qubits >= 2, "soak scenario needs at least 2 qubits");
    let (engine, gate_set) = new_engine();
    engine.set_gc_weight_table_threshold(gc_threshold);

    let bits = vec![false; qubits as usize];
    // `state` evolves across thousands of calls at a low GC threshold, so it
    // is kept as a persistent root rather than a bare `Edge`: an auto-GC
    // triggered by any of those calls (including the periodic `prob_sum`
    // check below) rewrites this root in place instead of leaving a stale
    // local behind.
    let state = engine.protect(engine.make_basis_state(&bits)?);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut stats = LatencyStats::new();

    for i in 0..gate_count {
        let (is_cnot, name, qubit) = random_gate(&mut rng, qubits);
        let current = engine.protected_value(&state);
        let start = Instant::now();
        let next = if is_cnot {
            apply_cnot(&engine, &gate_set, current, qubit, qubits)?
        } else {
            apply_1q(&engine, &gate_set, current, name, qubit, qubits)?
        };
        engine.update_protected(&state, next);
        stats.update(start.elapsed().as_nanos() as u64);

        if (i + 1) % 100 == 0 {
            let sum = engine.prob_sum(engine.protected_value(&state), 0, qubits);
            anyhow::ensure!(
                (sum - 1.0).abs() < 1e-10,
                "prob_sum drifted to {sum} after {} gates",
                i + 1
            );
        }
    }

    let final_state = engine.protected_value(&state);
    println!("Soak test: {gate_count} gates on {qubits} qubits, gc_threshold={gc_threshold}");
    println!("Final countnodes = {}", engine.countnodes(final_state));
    println!("Final prob_sum   = {:.12}", engine.prob_sum(final_state, 0, qubits));
    stats.print_report();
    engine.unprotect(&state);
    Ok(())
}
