//! Bandit agents sharing one epsilon-greedy learner.
//!
//! ```text
//! RUST_LOG=debug flare-demo --agents 8 --episodes 100 --model-dir ./models
//! flare-demo --model-dir ./models --resume 0
//! ```

mod bandit;

use bandit::{Bandit, EpsilonGreedy};
use clap::Parser;
use flare::{
    AgentConfig, AgentWorker, Coordinator, FlareError, Hyperparams, RunSettings, RunStatistics, SamplingKind,
    TaskSettings,
};
use log::{error, info};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const INTERRUPTED: u8 = 130;

/// Multi-agent bandit run on the flare coordinator.
#[derive(Parser, Debug)]
#[command(name = "flare-demo", about = "Bandit agents coordinated by flare")]
struct Args {
    /// Number of agent workers
    #[arg(long, default_value = "4")]
    agents: usize,

    /// Episodes per agent
    #[arg(long, default_value = "200")]
    episodes: usize,

    /// Pulls per episode
    #[arg(long, default_value = "20")]
    episode_len: usize,

    /// Comma-separated arm means
    #[arg(long, value_delimiter = ',', default_value = "0.1,0.5,0.9,0.3")]
    arms: Vec<f32>,

    /// Records per agent between learning updates
    #[arg(long, default_value = "16")]
    sample_interval: usize,

    /// Exploration rate
    #[arg(long, default_value = "0.1")]
    epsilon: f64,

    /// Learn from a replay buffer instead of the latest interval
    #[arg(long)]
    replay: bool,

    /// JSON file with run settings; flags below override it
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Checkpoint directory (disabled when absent)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Resume from this pass (0 = latest checkpoint)
    #[arg(long)]
    resume: Option<usize>,

    /// CSV file for progress summaries
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Records between progress summaries
    #[arg(long)]
    print_interval: Option<usize>,
}

impl Args {
    fn run_settings(&self) -> Result<RunSettings, String> {
        let mut settings = match &self.settings {
            Some(path) => {
                let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
                serde_json::from_reader(file).map_err(|e| format!("{}: {e}", path.display()))?
            }
            None => RunSettings::default(),
        };
        if let Some(dir) = &self.model_dir {
            settings = settings.with_model_dir(dir);
        }
        if let Some(pass) = self.resume {
            settings = settings.with_resume(pass);
        }
        if let Some(path) = &self.log_file {
            settings = settings.with_log_file(path);
        }
        if let Some(interval) = self.print_interval {
            settings = settings.with_print_interval(interval);
        }
        Ok(settings)
    }

    fn task_settings(&self) -> TaskSettings {
        let sampling = if self.replay {
            SamplingKind::ExperienceReplay {
                capacity: self.sample_interval * 64,
                batch_size: self.sample_interval,
                warmup: self.sample_interval * 4,
            }
        } else {
            SamplingKind::OnPolicy
        };
        TaskSettings::builder(EpsilonGreedy::new(self.arms.len(), self.epsilon))
            .with_hyperparams(Hyperparams::new().with("epsilon", self.epsilon))
            .with_sampling(sampling)
            .with_sample_interval(self.sample_interval)
            .with_num_agents(self.agents)
            .build()
    }
}

fn run(args: &Args, settings: RunSettings) -> Result<RunStatistics, FlareError> {
    let mut coordinator = Coordinator::new(settings)?;
    coordinator.create_tasks([("bandit", args.task_settings())])?;

    for seed in 0..args.agents {
        let env = Bandit::new(args.arms.clone(), args.episode_len, seed as u64);
        let config = AgentConfig::new().with_max_episodes(args.episodes);
        coordinator.register_agent(AgentWorker::new(env, config))?;
    }
    coordinator.start()
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match args.run_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("invalid settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&args, settings) {
        Ok(stats) => {
            info!(
                "finished: {} steps, {} episodes, average reward {:.3}",
                stats.total_steps, stats.episodes, stats.avg_episode_reward
            );
            match serde_json::to_string_pretty(&stats) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("cannot serialize statistics: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(FlareError::Interrupted) => {
            info!("interrupted");
            ExitCode::from(INTERRUPTED)
        }
        Err(e) => {
            error!("run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
