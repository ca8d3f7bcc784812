use structopt::StructOpt;

use queuesim::config::{read_config, ExperimentConfig};
use queuesim::traffic::TrafficMatrixBuilder;
use queuesim::{
    assign_addresses, secs, AddressAllocator, FlowTracker, QueueDiscipline, ToStdDuration,
    TopologyBuilder,
};

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "Queue Experiment", about = "Queueing study on a star-of-stars dumbbell")]
pub struct Opt {
    /// The configure file
    #[structopt(short = "c", long = "config")]
    pub config: std::path::PathBuf,

    /// Override the configured queue discipline
    #[structopt(short = "q", long = "queue")]
    pub queue: Option<QueueDiscipline>,

    /// Enable dumping packet traces at the sinks
    #[structopt(long = "trace")]
    pub trace: bool,

    /// Base name given to where the traces are saved when enabled
    #[structopt(long = "trace-file")]
    pub trace_file: Option<String>,

    /// Override the run duration, in seconds
    #[structopt(short = "d", long = "duration")]
    pub duration: Option<f64>,

    /// Multiply every configured link rate
    #[structopt(long = "rate-scale")]
    pub rate_scale: Option<f64>,
}

fn apply_overrides(config: &mut ExperimentConfig, opt: &Opt) {
    if let Some(q) = opt.queue {
        config.queue = q;
    }
    if opt.trace {
        config.trace = true;
    }
    if let Some(f) = &opt.trace_file {
        config.trace_file = Some(f.clone());
    }
    if let Some(d) = opt.duration {
        config.duration_secs = d;
    }
    if let Some(s) = opt.rate_scale {
        config.rate_scale = Some(s);
    }
}

fn run(config: &ExperimentConfig) -> Result<(), queuesim::Error> {
    let topo = TopologyBuilder::new(config.topo_spec()).build()?;
    log::info!("topology:\n{}", topo.to_dot());

    let mut alloc = AddressAllocator::from_cidr(&config.superblock)?;
    let plan = assign_addresses(&topo, &mut alloc)?;
    for (seg, block) in plan.blocks() {
        log::info!("segment {} <- {}", seg, block);
    }

    let mut builder = TrafficMatrixBuilder::new(config.flow_bytes, config.seed);
    let flows = builder.build(topo.index(), &config.pairing)?;

    let mut tracker = FlowTracker::new();
    for f in &flows {
        tracker.register(f.id, f.bytes);
        let dst = plan
            .primary_address(f.dst)
            .expect("addressed topology node");
        log::info!(
            "flow {}: {} -> {} ({}:{}, {} bytes, starts {:?})",
            f.id,
            topo[f.src].name,
            topo[f.dst].name,
            dst,
            f.port,
            f.bytes,
            f.start.to_dura()
        );
    }

    if config.trace {
        let base = config.trace_file.as_deref().unwrap_or("tcp-trace-results");
        log::info!("sink traces will be written under {}", base);
    }

    // the discrete-event engine itself comes from the simulation platform;
    // this binary stops at the deployment plan
    log::info!(
        "setup complete: {} nodes, {} flows, run duration {:?}",
        topo.num_nodes(),
        flows.len(),
        secs(config.duration_secs).to_dura()
    );
    Ok(())
}

fn main() {
    logging::init_log();

    let opt = Opt::from_args();
    log::info!("Opts: {:#?}", opt);

    let mut config = read_config(&opt.config);
    apply_overrides(&mut config, &opt);
    log::info!("config: {:#?}", config);

    if let Err(e) = run(&config) {
        log::error!("setup failed: {}", e);
        std::process::exit(1);
    }
}
