//! Command-line entry point: train a DQN agent, watch a saved one play, or
//! run the random-action demo.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atari_dqn::{
    checkpoint::resume_frame,
    demo::run_random_agent,
    environment::{Emulator, Environment},
    gym_wrapper::GymnasiumWrapper,
    trainer::evaluate,
    wrappers::DeepMindEnv,
    DqnAgent, TrainConfig, Trainer,
};
use clap::{Args, Parser, Subcommand};
use rand::{rngs::StdRng, SeedableRng};
use tch::Device;
use tensorboard_rs::summary_writer::SummaryWriter;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "atari-dqn", args_conflicts_with_subcommands = true)]
#[command(version, about = "Deep Q-Network agent for Atari games")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Without a subcommand the agent trains with these options
    #[command(flatten)]
    train: TrainArgs,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Frame count to start from. Defaults to the frame recorded with
    /// `--modelpath`, if any
    #[arg(long)]
    frame: Option<u64>,

    /// Previously saved model to continue training
    #[arg(long)]
    modelpath: Option<PathBuf>,

    /// JSON file overriding the default hyperparameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gymnasium environment id
    #[arg(long)]
    env: Option<String>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Write TensorBoard scalars to this directory
    #[arg(long)]
    logdir: Option<PathBuf>,

    /// Stop after this many frames even if not solved
    #[arg(long)]
    max_frames: Option<u64>,

    /// Show the game window while training
    #[arg(long)]
    render: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train an agent, checkpointing every target-network update
    Train(TrainArgs),

    /// Play greedily with a saved model
    Evaluate {
        #[arg(long)]
        modelpath: PathBuf,

        /// JSON file with the network and preprocessing the model was
        /// trained with
        #[arg(long)]
        config: Option<PathBuf>,

        /// Gymnasium environment id, overriding the config
        #[arg(long)]
        env: Option<String>,

        #[arg(long, default_value = "5")]
        episodes: usize,

        #[arg(long, default_value = "10000")]
        max_steps: u64,

        #[arg(long)]
        render: bool,
    },

    /// Play random actions on the raw game
    Random {
        #[arg(long, default_value = "MsPacman-v0")]
        env: String,

        #[arg(long, default_value = "10000")]
        steps: u64,

        #[arg(long)]
        no_render: bool,
    },
}

fn load_config(path: Option<&Path>, env: Option<String>) -> Result<TrainConfig> {
    let mut config = match path {
        Some(path) => TrainConfig::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => TrainConfig::default(),
    };
    if let Some(env) = env {
        config.env_id = env;
    }
    Ok(config)
}

fn train(args: TrainArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), args.env)?;
    if let Some(dir) = args.checkpoint_dir {
        config.checkpoint_dir = dir;
    }
    config.validate().context("Invalid configuration")?;

    let render_mode = args.render.then_some("human");
    let emulator = GymnasiumWrapper::new(&config.env_id, render_mode)
        .with_context(|| format!("Failed to create environment {}", config.env_id))?;
    let env = DeepMindEnv::new(emulator, config.wrappers.clone(), config.seed)?;

    let device = Device::cuda_if_available();
    info!("Starting training on device: {:?}", device);
    let mut agent = DqnAgent::new(
        config.agent.clone(),
        env.observation_shape(),
        env.num_actions(),
        device,
        config.seed,
    )?;

    let mut start_frame = args.frame.unwrap_or(0);
    if let Some(path) = args.modelpath {
        agent
            .load(&path)
            .with_context(|| format!("Failed to load model {}", path.display()))?;
        if args.frame.is_none() {
            start_frame = resume_frame(&path);
        }
        info!("Loaded model {}, resuming at frame {}", path.display(), start_frame);
    }

    let mut trainer = Trainer::new(env, agent, config)?
        .with_start_frame(start_frame)
        .with_render(args.render);
    if let Some(logdir) = args.logdir {
        trainer = trainer.with_writer(SummaryWriter::new(logdir));
    }

    let summary = trainer.run(args.max_frames)?;
    info!(
        frames = summary.frames,
        episodes = summary.episodes,
        running_reward = summary.running_reward,
        solved = summary.solved,
        "training finished"
    );

    let (env, _) = trainer.into_parts();
    env.into_inner().close()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Train(cli.train)) {
        Command::Train(args) => train(args)?,

        Command::Evaluate {
            modelpath,
            config,
            env,
            episodes,
            max_steps,
            render,
        } => {
            let config = load_config(config.as_deref(), env)?;
            config.validate().context("Invalid configuration")?;

            let mut emulator = GymnasiumWrapper::new(&config.env_id, None)
                .with_context(|| format!("Failed to create environment {}", config.env_id))?;
            if render {
                emulator.set_render_mode(Some("human"))?;
            }
            let mut env =
                DeepMindEnv::new(emulator, config.wrappers.for_evaluation(), config.seed)?;

            let mut agent = DqnAgent::new(
                config.agent.clone(),
                env.observation_shape(),
                env.num_actions(),
                Device::cuda_if_available(),
                config.seed,
            )?;
            agent
                .load(&modelpath)
                .with_context(|| format!("Failed to load model {}", modelpath.display()))?;

            let rewards = evaluate(&mut env, &agent, episodes, max_steps, render)?;
            info!(
                "Evaluation finished with a total reward of: {}",
                rewards.iter().sum::<f64>()
            );
            env.into_inner().close()?;
        }

        Command::Random {
            env,
            steps,
            no_render,
        } => {
            let render_mode = if no_render { None } else { Some("human") };
            let mut emulator = GymnasiumWrapper::new(&env, render_mode)
                .with_context(|| format!("Failed to create environment {env}"))?;
            let mut rng = StdRng::from_os_rng();
            run_random_agent(&mut emulator, steps, !no_render, &mut rng)?;
        }
    }

    Ok(())
}
