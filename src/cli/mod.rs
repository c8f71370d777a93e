// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and hands the work to Layer 2 (application); printing
// results happens here and nowhere else.
//
// Two commands are supported:
//   1. `train`   - trains the captioning model on Flickr8k
//   2. `caption` - loads a checkpoint and captions one image

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{CaptionArgs, Commands, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "image-captioner",
    version,
    about = "Train an attention-based image captioning model, then caption images."
)]
pub struct Cli {
    /// The subcommand to run (train or caption)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Caption(args) => run_caption(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let config = args.resolve()?;
    tracing::info!("Starting training on data in: {}", config.data_dir);

    let checkpoint_dir = config.checkpoint_dir.clone();
    let report = TrainUseCase::new(config).execute()?;

    if let Some(last) = report.epochs.last() {
        println!("Training complete after {} epochs, final loss {:.4}.", last.epoch, last.loss);
    }
    match report.checkpoints.as_slice() {
        []    => println!("No checkpoint epoch was reached; nothing saved to '{checkpoint_dir}'."),
        saved => println!("Checkpoints for epochs {saved:?} saved to '{checkpoint_dir}'."),
    }
    Ok(())
}

fn run_caption(args: CaptionArgs) -> Result<()> {
    use crate::application::caption_use_case::CaptionUseCase;

    let result = CaptionUseCase::new((&args).into()).execute()?;

    println!("\nCaption (epoch {}): {}", result.epoch, result.text);
    if args.show_attention {
        for (i, f) in result.focus.iter().enumerate() {
            println!("  {:>2}. {:<15} region {:>3}  weight {:.3}", i + 1, f.word, f.position, f.weight);
        }
    }
    Ok(())
}
