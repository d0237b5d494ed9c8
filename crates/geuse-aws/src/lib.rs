pub mod client;
pub mod cloudfront;
pub mod creds;
pub mod ec2;
pub mod efs;
pub mod elb;
pub mod error;
pub mod iam;
pub mod image;
pub mod pricing_api;
pub mod quotas;
pub mod sg;
pub mod sign;
pub mod ssm;
pub mod tags;
pub mod types;
pub mod xml;

pub use client::{AwsClient, AwsClientFactory, BaseUrls, Params};
pub use cloudfront::{CloudFrontService, DistributionSpec};
pub use creds::{AwsCredentials, CredentialsProvider};
pub use ec2::Ec2Service;
pub use efs::EfsService;
pub use elb::ElbService;
pub use error::AwsError;
pub use iam::{CallerIdentity, IamService};
pub use image::{is_gpu_instance_type, ImageResolver};
pub use pricing_api::PricingApi;
pub use quotas::QuotaService;
pub use sg::{IngressRule, SecurityGroupService};
pub use ssm::{CommandOutcome, SsmService};
pub use types::*;
