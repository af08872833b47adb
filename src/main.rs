//! pgnrs: pointer-generator summarization in rust
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pgnrs::actions::{build_vocab, preprocess, summarize, train};
use pgnrs::config::{Action, Args};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("pgnrs=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let device: tch::Device = args.device.into();

    // print a banner with pgnrs
    println!(
        r#"

* ***    *** *  * ***   * **   ****
**   *  *   *   **   *   *    *    *
*    *  *   *   *    *   *     **
*    *   ***    *    *   *       **
** **   *       *    *   *    *    *
* *      ****   *    *   *     ****
*       *    *
*        ****
"#
    );

    // if not built in release mode, print a big warning
    #[cfg(debug_assertions)]
    {
        println!("WARNING: This is a debug build. It will be very slow.");
    }

    match args.action {
        Action::Preprocess { params } => {
            preprocess(&params).context("preprocessing failed")?;
        }
        Action::BuildVocab { params } => {
            build_vocab(&params).context("cannot build the vocabulary")?;
        }
        Action::Train { model, training } => {
            let run_name = training
                .run_name
                .clone()
                .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
            tracing::info!("run name: {}", run_name);

            // a checkpoint is saved before stopping on Ctrl-C
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = stop.clone();
            ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))
                .context("cannot install the Ctrl-C handler")?;

            let last_step =
                train(device, run_name, model, training, &stop).context("training failed")?;
            tracing::info!("trained up to step {}", last_step);
        }
        Action::Summarize { params } => {
            let n = summarize(device, &params).context("summarization failed")?;
            tracing::info!("summarized {} articles", n);
        }
    }

    Ok(())
}
