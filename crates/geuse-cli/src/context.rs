//! Shared command context: state store, provider clients, output format.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use geuse_aws::{AwsClient, AwsClientFactory};
use geuse_domain::{AmiVariant, Architecture, OsType, Tier};
use geuse_store::StateStore;

use crate::cli::{AmiTypeArg, ArchitectureArg, OsTypeArg, TierArg};
use crate::output::OutputFormat;

pub struct CliContext {
    pub store: StateStore,
    pub factory: AwsClientFactory,
    pub format: OutputFormat,
}

impl CliContext {
    pub fn new(state_dir: Option<PathBuf>, format: OutputFormat) -> Result<Self> {
        Ok(Self {
            store: StateStore::open(state_dir)?,
            factory: AwsClientFactory::new(),
            format,
        })
    }

    pub fn client(&self, region: &str) -> Arc<AwsClient> {
        self.factory.client(region)
    }

    /// Ask the operator before a destructive action. Non-text output modes
    /// never prompt; those callers must pass --force.
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if !self.format.is_text() {
            anyhow::bail!("confirmation required: re-run with --force in non-text output modes");
        }
        print!("{prompt} [y/N]: ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}

impl From<TierArg> for Tier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Dev => Tier::Dev,
            TierArg::Automation => Tier::Automation,
            TierArg::Gpu => Tier::Gpu,
        }
    }
}

impl From<OsTypeArg> for OsType {
    fn from(arg: OsTypeArg) -> Self {
        match arg {
            OsTypeArg::AmazonLinux2023 => OsType::AmazonLinux2023,
            OsTypeArg::Ubuntu2204 => OsType::Ubuntu2204,
            OsTypeArg::Ubuntu2404 => OsType::Ubuntu2404,
            OsTypeArg::AmazonLinux2 => OsType::AmazonLinux2,
        }
    }
}

impl From<ArchitectureArg> for Architecture {
    fn from(arg: ArchitectureArg) -> Self {
        match arg {
            ArchitectureArg::X86_64 => Architecture::X86_64,
            ArchitectureArg::Arm64 => Architecture::Arm64,
        }
    }
}

impl From<AmiTypeArg> for AmiVariant {
    fn from(arg: AmiTypeArg) -> Self {
        match arg {
            AmiTypeArg::Base => AmiVariant::Base,
            AmiTypeArg::Pytorch => AmiVariant::Pytorch,
            AmiTypeArg::Tensorflow => AmiVariant::Tensorflow,
            AmiTypeArg::MultiFramework => AmiVariant::MultiFramework,
        }
    }
}
