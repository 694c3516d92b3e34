use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use bytes::Bytes;
use checkgate_core::UserKey;
use checkgate_core::config::Config;
use checkgate_core::extract::ExtractorKind;
use checkgate_core::extract::PDF_MIME_TYPE;
use checkgate_core::extract::ReceiptContent;
use checkgate_core::extract::ReceiptDocument;
use checkgate_core::scratch::Scratch;
use clap::Parser;

/// Run one extractor against a local receipt and print the identifier.
#[derive(Debug, Parser)]
pub struct ExtractCli {
    /// Extraction strategy: filename, structured or optical.
    #[arg(long = "strategy", short = 's', value_name = "STRATEGY", default_value = "structured")]
    strategy: ExtractorKind,

    /// Receipt file: a PDF for the document strategies, an image for optical.
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

pub async fn run(cli: ExtractCli, config: &Config) -> Result<()> {
    let bytes = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("failed to read {}", cli.file.display()))?;
    let content = match cli.strategy {
        ExtractorKind::Optical => ReceiptContent::Photo(Bytes::from(bytes)),
        ExtractorKind::Filename | ExtractorKind::Structured => {
            ReceiptContent::Document(ReceiptDocument {
                file_name: cli
                    .file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned()),
                mime_type: Some(PDF_MIME_TYPE.to_string()),
                bytes: Bytes::from(bytes),
            })
        }
    };

    let extractor = config
        .extractor(cli.strategy)
        .context("failed to build extractor")?;
    let scratch = Scratch::create(&config.scratch_dir, &UserKey::from("cli"))
        .with_context(|| format!("failed to create scratch in {}", config.scratch_dir.display()))?;
    let extraction = extractor
        .extract(&content, &scratch)
        .await
        .with_context(|| format!("{} extraction failed", cli.strategy))?;

    println!("{}", extraction.identifier);
    for (name, value) in &extraction.fields {
        println!("{name}: {value}");
    }
    Ok(())
}
