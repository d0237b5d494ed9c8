//! Security group operations.

use std::sync::Arc;

use tracing::{debug, info};

use crate::client::{AwsClient, Params};
use crate::error::AwsError;
use crate::types::SecurityGroupInfo;
use crate::xml::{xml_blocks, xml_text};

const EC2_VERSION: &str = "2016-11-15";
const SERVICE: &str = "ec2";

/// One TCP ingress rule: a port opened to a CIDR range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub port: u16,
    pub cidr: String,
}

impl IngressRule {
    pub fn open(port: u16) -> Self {
        Self {
            port,
            cidr: "0.0.0.0/0".into(),
        }
    }

    pub fn restricted(port: u16, cidr: impl Into<String>) -> Self {
        Self {
            port,
            cidr: cidr.into(),
        }
    }
}

pub struct SecurityGroupService {
    client: Arc<AwsClient>,
}

impl SecurityGroupService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn query(&self, params: &Params) -> Result<String, AwsError> {
        let base = self.client.base().ec2.clone();
        let region = self.client.region().to_string();
        self.client.query_api(&base, SERVICE, &region, params).await
    }

    pub async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        ingress: &[IngressRule],
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        info!(name, vpc_id, "creating security group");
        let xml = self
            .query(
                &Params::action("CreateSecurityGroup", EC2_VERSION)
                    .add("GroupName", name)
                    .add("GroupDescription", description)
                    .add("VpcId", vpc_id)
                    .tag_spec("security-group", tags),
            )
            .await?;
        let group_id =
            xml_text(&xml, "groupId").ok_or_else(|| AwsError::missing_field(SERVICE, "groupId"))?;
        self.authorize_ingress(&group_id, ingress).await?;
        Ok(group_id)
    }

    pub async fn authorize_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), AwsError> {
        if rules.is_empty() {
            return Ok(());
        }
        let mut params =
            Params::action("AuthorizeSecurityGroupIngress", EC2_VERSION).add("GroupId", group_id);
        for (i, rule) in rules.iter().enumerate() {
            let n = i + 1;
            params = params
                .add(format!("IpPermissions.{n}.IpProtocol"), "tcp")
                .add(format!("IpPermissions.{n}.FromPort"), rule.port.to_string())
                .add(format!("IpPermissions.{n}.ToPort"), rule.port.to_string())
                .add(format!("IpPermissions.{n}.IpRanges.1.CidrIp"), &rule.cidr);
        }
        self.query(&params).await.map(|_| ())
    }

    pub async fn describe_security_group(
        &self,
        group_id: &str,
    ) -> Result<SecurityGroupInfo, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeSecurityGroups", EC2_VERSION).add("GroupId.1", group_id),
            )
            .await?;
        parse_sg_blocks(&xml)
            .into_iter()
            .next()
            .ok_or_else(|| AwsError::api(SERVICE, "InvalidGroup.NotFound", group_id.to_string()))
    }

    pub async fn describe_by_tag_keys(
        &self,
        keys: &[&str],
    ) -> Result<Vec<SecurityGroupInfo>, AwsError> {
        let mut params =
            Params::action("DescribeSecurityGroups", EC2_VERSION).add("Filter.1.Name", "tag-key");
        for (i, key) in keys.iter().enumerate() {
            params = params.add(format!("Filter.1.Value.{}", i + 1), *key);
        }
        let xml = self.query(&params).await?;
        Ok(parse_sg_blocks(&xml))
    }

    /// Open port 443 when it is not already open. Idempotent: returns true
    /// when the rule was added, false when it was already present.
    pub async fn ensure_https_port(&self, group_id: &str) -> Result<bool, AwsError> {
        let info = self.describe_security_group(group_id).await?;
        if info.open_tcp_ports.contains(&443) {
            debug!(group_id, "port 443 already open");
            return Ok(false);
        }
        match self
            .authorize_ingress(group_id, &[IngressRule::open(443)])
            .await
        {
            Ok(()) => Ok(true),
            // A concurrent writer may have added the rule between the
            // describe and the authorize.
            Err(e) if e.is_code("InvalidPermission.Duplicate") => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_security_group(&self, group_id: &str) -> Result<(), AwsError> {
        info!(group_id, "deleting security group");
        self.query(&Params::action("DeleteSecurityGroup", EC2_VERSION).add("GroupId", group_id))
            .await
            .map(|_| ())
    }
}

fn parse_sg_blocks(xml: &str) -> Vec<SecurityGroupInfo> {
    let mut groups = Vec::new();
    for set in xml_blocks(xml, "securityGroupInfo") {
        for item in xml_blocks(&set, "item") {
            let Some(group_id) = xml_text(&item, "groupId") else {
                continue;
            };
            let mut open_tcp_ports = Vec::new();
            if let Some(perms) = xml_blocks(&item, "ipPermissions").first() {
                for perm in xml_blocks(perms, "item") {
                    if let Some(port) = xml_text(&perm, "fromPort").and_then(|p| p.parse().ok()) {
                        open_tcp_ports.push(port);
                    }
                }
            }
            groups.push(SecurityGroupInfo {
                group_id,
                group_name: xml_text(&item, "groupName").unwrap_or_default(),
                vpc_id: xml_text(&item, "vpcId").unwrap_or_default(),
                open_tcp_ports,
                tags: super::ec2::parse_tag_map(&item),
            });
        }
    }
    groups
}
