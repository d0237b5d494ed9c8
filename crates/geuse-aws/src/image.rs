//! Machine image resolution: preferred-id table first, then ranked
//! name-pattern search ordered by GPU/CPU fit, newest creation date wins.

use std::sync::Arc;

use geuse_domain::{AmiVariant, Architecture, OsType};
use tracing::{debug, info};

use crate::client::AwsClient;
use crate::ec2::Ec2Service;
use crate::error::AwsError;

/// Preferred Amazon Linux 2023 base images per region and architecture.
/// Validated through describe-images before use; pattern search is the
/// fallback when the id is missing or no longer available.
const AL2023_BASE_AMIS: &[(&str, &str, &str)] = &[
    ("us-east-1", "x86_64", "ami-0941ba2cd9ee2998a"),
    ("us-east-1", "arm64", "ami-08742254cf19c5488"),
    ("us-west-2", "x86_64", "ami-019056869a13971ff"),
    ("us-west-2", "arm64", "ami-0c5b116eea276f6f1"),
    ("eu-west-1", "x86_64", "ami-0a80bf774329b5816"),
    ("eu-west-1", "arm64", "ami-0e69d8ca2344ffc9d"),
    ("ap-southeast-1", "x86_64", "ami-05b1f2b5642f2ad75"),
    ("ap-southeast-1", "arm64", "ami-0895a44228ddd0f3d"),
];

/// GPU instance families: p* are training-optimized, g* graphics/inference,
/// g5g is Graviton with GPU.
const GPU_FAMILIES: &[&str] = &[
    "p3", "p4", "p5", "p5e", "p6", "g3", "g4", "g5", "g6", "g6e", "g5g",
];

pub fn is_gpu_instance_type(instance_type: &str) -> bool {
    let family = instance_type
        .split('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    GPU_FAMILIES.contains(&family.as_str())
}

fn os_label(os: OsType) -> &'static str {
    match os {
        OsType::AmazonLinux2023 => "Amazon Linux 2023",
        OsType::Ubuntu2204 => "Ubuntu 22.04",
        OsType::Ubuntu2404 => "Ubuntu 24.04",
        OsType::AmazonLinux2 => "Amazon Linux 2",
    }
}

/// Ordered name patterns for one (variant, os) pair, specificity first.
/// The preferred compute class (GPU for GPU instance kinds, CPU otherwise)
/// contributes its patterns before the other class.
fn name_patterns(variant: AmiVariant, os: OsType, gpu_first: bool) -> Vec<String> {
    let os = os_label(os);
    let (gpu, cpu): (Vec<String>, Vec<String>) = match variant {
        AmiVariant::Base => (
            vec![
                format!("Deep Learning Base GPU AMI ({os})*"),
                format!("Deep Learning Base*GPU* ({os})*"),
                format!("Deep Learning Base* ({os})*"),
            ],
            vec![
                format!("Deep Learning Base AMI ({os})*"),
                format!("Deep Learning Base*AMI* ({os})*"),
                format!("Deep Learning Base* ({os})*"),
            ],
        ),
        AmiVariant::Pytorch => (
            vec![
                format!("Deep Learning AMI GPU PyTorch* ({os})*"),
                format!("Deep Learning AMI*GPU*PyTorch* ({os})*"),
            ],
            vec![format!("Deep Learning AMI CPU PyTorch* ({os})*")],
        ),
        AmiVariant::Tensorflow => (
            vec![format!("Deep Learning AMI GPU TensorFlow* ({os})*")],
            vec![format!("Deep Learning AMI CPU TensorFlow* ({os})*")],
        ),
        AmiVariant::MultiFramework => (
            vec![
                format!("Deep Learning AMI GPU ({os})*"),
                format!("Deep Learning AMI*GPU* ({os})*"),
            ],
            vec![
                format!("Deep Learning AMI ({os})*"),
                format!("Deep Learning AMI CPU ({os})*"),
                format!("Deep Learning AMI* ({os})*"),
            ],
        ),
    };

    let ordered = if gpu_first {
        [gpu, cpu].concat()
    } else {
        [cpu, gpu].concat()
    };
    let mut deduped = Vec::new();
    for pattern in ordered {
        if !deduped.contains(&pattern) {
            deduped.push(pattern);
        }
    }
    deduped
}

pub struct ImageResolver {
    ec2: Ec2Service,
    region: String,
}

impl ImageResolver {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self {
            region: client.region().to_string(),
            ec2: Ec2Service::new(client),
        }
    }

    /// Resolve the newest machine image for the requested OS, architecture,
    /// variant, and instance kind.
    pub async fn resolve(
        &self,
        os: OsType,
        architecture: Architecture,
        variant: AmiVariant,
        instance_type: Option<&str>,
    ) -> Result<String, AwsError> {
        // Direct id lookup for the AL2023 base combination.
        if os == OsType::AmazonLinux2023 && variant == AmiVariant::Base {
            if let Some(preferred) = self.preferred_id(architecture) {
                if self.image_available(preferred).await? {
                    debug!(image_id = preferred, "using preferred base image");
                    return Ok(preferred.to_string());
                }
            }
        }

        let gpu_first = instance_type.map(is_gpu_instance_type).unwrap_or(false);
        for pattern in name_patterns(variant, os, gpu_first) {
            let mut images = self
                .ec2
                .describe_images_by_name(&pattern, architecture.as_ec2_str())
                .await?;
            if images.is_empty() {
                continue;
            }
            images.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
            let chosen = &images[0];
            info!(image_id = %chosen.image_id, name = %chosen.name, "resolved machine image");
            return Ok(chosen.image_id.clone());
        }

        Err(AwsError::Internal(format!(
            "no machine image found for os={os}, arch={architecture}, variant={variant}, instance_type={}",
            instance_type.unwrap_or("any")
        )))
    }

    /// Root device name of an image, defaulting to the stock Linux value.
    pub async fn root_device_name(&self, image_id: &str) -> String {
        match self.ec2.describe_images_by_id(image_id).await {
            Ok(images) => images
                .into_iter()
                .next()
                .and_then(|i| i.root_device_name)
                .unwrap_or_else(|| "/dev/xvda".into()),
            Err(_) => "/dev/xvda".into(),
        }
    }

    fn preferred_id(&self, architecture: Architecture) -> Option<&'static str> {
        AL2023_BASE_AMIS
            .iter()
            .find(|(region, arch, _)| {
                *region == self.region && *arch == architecture.as_ec2_str()
            })
            .map(|(_, _, id)| *id)
    }

    async fn image_available(&self, image_id: &str) -> Result<bool, AwsError> {
        Ok(!self.ec2.describe_images_by_id(image_id).await?.is_empty())
    }
}
