//! EC2 operations: instances, spot market data, images, and networking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use geuse_domain::SpotPrice;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::client::{AwsClient, Params};
use crate::error::AwsError;
use crate::types::{
    ImageInfo, InstanceInfo, InstanceStatusInfo, LaunchSpec, NetworkInterfaceInfo, RouteTableInfo,
    SubnetInfo, VpcInfo,
};
use crate::xml::{xml_all_texts, xml_blocks, xml_text};

const EC2_VERSION: &str = "2016-11-15";
const SERVICE: &str = "ec2";

/// Default state-wait budget: 60 polls at 5 s apiece.
const WAIT_MAX_ATTEMPTS: u32 = 60;
const WAIT_DELAY: Duration = Duration::from_secs(5);

pub struct Ec2Service {
    client: Arc<AwsClient>,
}

impl Ec2Service {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn query(&self, params: &Params) -> Result<String, AwsError> {
        let base = self.client.base().ec2.clone();
        let region = self.client.region().to_string();
        self.client.query_api(&base, SERVICE, &region, params).await
    }

    // ── Instances ─────────────────────────────────────────────────────────────

    /// Launch one instance. The caller handles IAM-propagation retries.
    pub async fn run_instances(&self, spec: &LaunchSpec) -> Result<String, AwsError> {
        let mut params = Params::action("RunInstances", EC2_VERSION)
            .add("MinCount", "1")
            .add("MaxCount", "1")
            .add("ImageId", &spec.image_id)
            .add("InstanceType", &spec.instance_type)
            .add("SubnetId", &spec.subnet_id)
            .add("UserData", BASE64.encode(&spec.user_data))
            .add("BlockDeviceMapping.1.DeviceName", &spec.root_device_name)
            .add("BlockDeviceMapping.1.Ebs.VolumeSize", spec.root_volume_gib.to_string())
            .add("BlockDeviceMapping.1.Ebs.VolumeType", "gp3")
            .add("BlockDeviceMapping.1.Ebs.DeleteOnTermination", "true")
            .add("BlockDeviceMapping.1.Ebs.Encrypted", "true")
            .maybe("KeyName", spec.key_name.clone())
            .maybe("Placement.AvailabilityZone", spec.availability_zone.clone())
            .tag_spec("instance", &spec.tags);
        for (i, sg) in spec.security_group_ids.iter().enumerate() {
            params = params.add(format!("SecurityGroupId.{}", i + 1), sg);
        }
        if let Some(ref profile) = spec.iam_instance_profile_name {
            params = params.add("IamInstanceProfile.Name", profile);
        }
        if spec.spot {
            params = params
                .add("InstanceMarketOptions.MarketType", "spot")
                .add("InstanceMarketOptions.SpotOptions.SpotInstanceType", "one-time")
                .add(
                    "InstanceMarketOptions.SpotOptions.InstanceInterruptionBehavior",
                    "terminate",
                );
        }

        let xml = self.query(&params).await?;
        let instance_id = xml_text(&xml, "instanceId")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "instanceId"))?;
        info!(instance_id, instance_type = %spec.instance_type, spot = spec.spot, "launched instance");
        Ok(instance_id)
    }

    pub async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeInstances", EC2_VERSION).add("InstanceId.1", instance_id),
            )
            .await?;
        parse_instance_blocks(&xml)
            .into_iter()
            .next()
            .ok_or_else(|| AwsError::missing_field(SERVICE, "instancesSet"))
    }

    /// Instances carrying any of the given tag keys (orphan scan).
    pub async fn describe_instances_by_tag_keys(
        &self,
        keys: &[&str],
    ) -> Result<Vec<InstanceInfo>, AwsError> {
        let mut params =
            Params::action("DescribeInstances", EC2_VERSION).add("Filter.1.Name", "tag-key");
        for (i, key) in keys.iter().enumerate() {
            params = params.add(format!("Filter.1.Value.{}", i + 1), *key);
        }
        let xml = self.query(&params).await?;
        Ok(parse_instance_blocks(&xml))
    }

    pub async fn instance_status(
        &self,
        instance_id: &str,
    ) -> Result<InstanceStatusInfo, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeInstanceStatus", EC2_VERSION)
                    .add("InstanceId.1", instance_id)
                    .add("IncludeAllInstances", "true"),
            )
            .await?;
        let block = xml_blocks(&xml, "instanceStatusSet")
            .into_iter()
            .next()
            .ok_or_else(|| AwsError::missing_field(SERVICE, "instanceStatusSet"))?;
        let state = xml_blocks(&block, "instanceState")
            .first()
            .and_then(|b| xml_text(b, "name"))
            .unwrap_or_else(|| "unknown".into());
        let system_status = xml_blocks(&block, "systemStatus")
            .first()
            .and_then(|b| xml_text(b, "status"))
            .unwrap_or_else(|| "unknown".into());
        let instance_status = xml_blocks(&block, "instanceStatus")
            .first()
            .and_then(|b| xml_text(b, "status"))
            .unwrap_or_else(|| "unknown".into());
        Ok(InstanceStatusInfo {
            instance_id: instance_id.to_string(),
            instance_state: state,
            instance_status,
            system_status,
        })
    }

    pub async fn stop_instance(&self, instance_id: &str) -> Result<(), AwsError> {
        self.query(&Params::action("StopInstances", EC2_VERSION).add("InstanceId.1", instance_id))
            .await
            .map(|_| ())
    }

    pub async fn start_instance(&self, instance_id: &str) -> Result<(), AwsError> {
        self.query(&Params::action("StartInstances", EC2_VERSION).add("InstanceId.1", instance_id))
            .await
            .map(|_| ())
    }

    pub async fn terminate_instance(&self, instance_id: &str) -> Result<(), AwsError> {
        self.query(
            &Params::action("TerminateInstances", EC2_VERSION).add("InstanceId.1", instance_id),
        )
        .await
        .map(|_| ())
    }

    pub async fn modify_instance_type(
        &self,
        instance_id: &str,
        instance_type: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("ModifyInstanceAttribute", EC2_VERSION)
                .add("InstanceId", instance_id)
                .add("InstanceType.Value", instance_type),
        )
        .await
        .map(|_| ())
    }

    pub async fn wait_for_running(&self, instance_id: &str) -> Result<(), AwsError> {
        self.wait_for_instance_state(instance_id, "running").await
    }

    pub async fn wait_for_stopped(&self, instance_id: &str) -> Result<(), AwsError> {
        self.wait_for_instance_state(instance_id, "stopped").await
    }

    pub async fn wait_for_terminated(&self, instance_id: &str) -> Result<(), AwsError> {
        self.wait_for_instance_state(instance_id, "terminated").await
    }

    async fn wait_for_instance_state(
        &self,
        instance_id: &str,
        target: &'static str,
    ) -> Result<(), AwsError> {
        for attempt in 1..=WAIT_MAX_ATTEMPTS {
            let info = self.describe_instance(instance_id).await?;
            if info.state == target {
                return Ok(());
            }
            debug!(instance_id, state = %info.state, target, attempt, "waiting for instance state");
            tokio::time::sleep(WAIT_DELAY).await;
        }
        Err(AwsError::WaitTimeout {
            resource: instance_id.to_string(),
            target,
            attempts: WAIT_MAX_ATTEMPTS,
        })
    }

    // ── Spot market ───────────────────────────────────────────────────────────

    /// Spot price history for `Linux/UNIX` since `start_time`.
    pub async fn spot_price_history(
        &self,
        instance_type: &str,
        start_time: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<SpotPrice>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeSpotPriceHistory", EC2_VERSION)
                    .add("InstanceType.1", instance_type)
                    .add("ProductDescription.1", "Linux/UNIX")
                    .add("StartTime", start_time.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                    .add("MaxResults", max_results.to_string()),
            )
            .await?;

        let set = xml_blocks(&xml, "spotPriceHistorySet");
        let Some(set) = set.first() else {
            return Ok(vec![]);
        };
        let mut prices = Vec::new();
        for item in xml_blocks(set, "item") {
            let (Some(az), Some(price)) = (
                xml_text(&item, "availabilityZone"),
                xml_text(&item, "spotPrice"),
            ) else {
                continue;
            };
            let Ok(price) = price.parse::<Decimal>() else {
                continue;
            };
            let timestamp = xml_text(&item, "timestamp")
                .and_then(|t| t.parse::<DateTime<Utc>>().ok())
                .unwrap_or_else(Utc::now);
            prices.push(SpotPrice {
                instance_type: xml_text(&item, "instanceType")
                    .unwrap_or_else(|| instance_type.to_string()),
                availability_zone: az,
                price_per_hour: price,
                timestamp,
                region: self.client.region().to_string(),
            });
        }
        Ok(prices)
    }

    /// Per-AZ spot placement scores in [1, 10]; empty map on any failure.
    pub async fn spot_placement_scores(
        &self,
        instance_type: &str,
    ) -> Result<BTreeMap<String, f64>, AwsError> {
        let xml = self
            .query(
                &Params::action("GetSpotPlacementScores", EC2_VERSION)
                    .add("InstanceType.1", instance_type)
                    .add("TargetCapacity", "1")
                    .add("SingleAvailabilityZone", "true"),
            )
            .await?;
        let mut scores = BTreeMap::new();
        for item in xml_blocks(&xml, "item") {
            let az = xml_text(&item, "availabilityZone")
                .or_else(|| xml_text(&item, "availabilityZoneId"));
            let score = xml_text(&item, "score").and_then(|s| s.parse::<f64>().ok());
            if let (Some(az), Some(score)) = (az, score) {
                if score > 0.0 {
                    scores.insert(az, score);
                }
            }
        }
        Ok(scores)
    }

    /// Dry-run a spot launch to probe capacity. The provider's
    /// "DryRunOperation" code means the request would have succeeded.
    pub async fn dry_run_spot_capacity(
        &self,
        instance_type: &str,
        image_id: &str,
        availability_zone: &str,
    ) -> Result<bool, AwsError> {
        let result = self
            .query(
                &Params::action("RunInstances", EC2_VERSION)
                    .add("DryRun", "true")
                    .add("MinCount", "1")
                    .add("MaxCount", "1")
                    .add("ImageId", image_id)
                    .add("InstanceType", instance_type)
                    .add("InstanceMarketOptions.MarketType", "spot")
                    .add("Placement.AvailabilityZone", availability_zone),
            )
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_code("DryRunOperation") => Ok(true),
            Err(e) if e.is_code("InsufficientInstanceCapacity") => Ok(false),
            Err(e) => {
                debug!(instance_type, availability_zone, error = %e, "capacity dry-run failed");
                Ok(false)
            }
        }
    }

    // ── Images ────────────────────────────────────────────────────────────────

    pub async fn describe_images_by_id(&self, image_id: &str) -> Result<Vec<ImageInfo>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeImages", EC2_VERSION)
                    .add("ImageId.1", image_id)
                    .add("Owner.1", "amazon")
                    .add("Filter.1.Name", "state")
                    .add("Filter.1.Value.1", "available"),
            )
            .await;
        match xml {
            Ok(xml) => Ok(parse_image_blocks(&xml)),
            Err(e) if e.is_code("InvalidAMIID.NotFound") || e.is_code("InvalidAMIID.Malformed") => {
                Ok(vec![])
            }
            Err(e) => Err(e),
        }
    }

    pub async fn describe_images_by_name(
        &self,
        name_pattern: &str,
        architecture: &str,
    ) -> Result<Vec<ImageInfo>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeImages", EC2_VERSION)
                    .add("Owner.1", "amazon")
                    .add("Filter.1.Name", "name")
                    .add("Filter.1.Value.1", name_pattern)
                    .add("Filter.2.Name", "state")
                    .add("Filter.2.Value.1", "available")
                    .add("Filter.3.Name", "architecture")
                    .add("Filter.3.Value.1", architecture),
            )
            .await?;
        Ok(parse_image_blocks(&xml))
    }

    // ── VPC ───────────────────────────────────────────────────────────────────

    pub async fn create_vpc(
        &self,
        cidr: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        info!(cidr, "creating VPC");
        let xml = self
            .query(
                &Params::action("CreateVpc", EC2_VERSION)
                    .add("CidrBlock", cidr)
                    .tag_spec("vpc", tags),
            )
            .await?;
        xml_text(&xml, "vpcId").ok_or_else(|| AwsError::missing_field(SERVICE, "vpcId"))
    }

    pub async fn modify_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: &str,
        value: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("ModifyVpcAttribute", EC2_VERSION)
                .add("VpcId", vpc_id)
                .add(attribute, value),
        )
        .await
        .map(|_| ())
    }

    pub async fn describe_vpc(&self, vpc_id: &str) -> Result<VpcInfo, AwsError> {
        let xml = self
            .query(&Params::action("DescribeVpcs", EC2_VERSION).add("VpcId.1", vpc_id))
            .await?;
        parse_vpc_blocks(&xml)
            .into_iter()
            .next()
            .ok_or_else(|| AwsError::api(SERVICE, "InvalidVpcID.NotFound", vpc_id.to_string()))
    }

    pub async fn find_vpcs_by_name_tag(&self, name: &str) -> Result<Vec<VpcInfo>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeVpcs", EC2_VERSION)
                    .add("Filter.1.Name", "tag:Name")
                    .add("Filter.1.Value.1", name),
            )
            .await?;
        Ok(parse_vpc_blocks(&xml))
    }

    pub async fn describe_vpcs_by_tag_keys(
        &self,
        keys: &[&str],
    ) -> Result<Vec<VpcInfo>, AwsError> {
        let mut params =
            Params::action("DescribeVpcs", EC2_VERSION).add("Filter.1.Name", "tag-key");
        for (i, key) in keys.iter().enumerate() {
            params = params.add(format!("Filter.1.Value.{}", i + 1), *key);
        }
        let xml = self.query(&params).await?;
        Ok(parse_vpc_blocks(&xml))
    }

    pub async fn delete_vpc(&self, vpc_id: &str) -> Result<(), AwsError> {
        info!(vpc_id, "deleting VPC");
        self.query(&Params::action("DeleteVpc", EC2_VERSION).add("VpcId", vpc_id))
            .await
            .map(|_| ())
    }

    // ── Subnets ───────────────────────────────────────────────────────────────

    pub async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr: &str,
        availability_zone: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        info!(vpc_id, cidr, availability_zone, "creating subnet");
        let xml = self
            .query(
                &Params::action("CreateSubnet", EC2_VERSION)
                    .add("VpcId", vpc_id)
                    .add("CidrBlock", cidr)
                    .add("AvailabilityZone", availability_zone)
                    .tag_spec("subnet", tags),
            )
            .await?;
        xml_text(&xml, "subnetId").ok_or_else(|| AwsError::missing_field(SERVICE, "subnetId"))
    }

    /// Public subnets auto-assign public IPs.
    pub async fn enable_auto_assign_public_ip(&self, subnet_id: &str) -> Result<(), AwsError> {
        self.query(
            &Params::action("ModifySubnetAttribute", EC2_VERSION)
                .add("SubnetId", subnet_id)
                .add("MapPublicIpOnLaunch.Value", "true"),
        )
        .await
        .map(|_| ())
    }

    pub async fn describe_subnets(&self, vpc_id: &str) -> Result<Vec<SubnetInfo>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeSubnets", EC2_VERSION)
                    .add("Filter.1.Name", "vpc-id")
                    .add("Filter.1.Value.1", vpc_id),
            )
            .await?;
        let mut subnets = Vec::new();
        for set in xml_blocks(&xml, "subnetSet") {
            for item in xml_blocks(&set, "item") {
                let Some(subnet_id) = xml_text(&item, "subnetId") else {
                    continue;
                };
                subnets.push(SubnetInfo {
                    subnet_id,
                    vpc_id: xml_text(&item, "vpcId").unwrap_or_default(),
                    availability_zone: xml_text(&item, "availabilityZone").unwrap_or_default(),
                    cidr_block: xml_text(&item, "cidrBlock").unwrap_or_default(),
                    map_public_ip_on_launch: xml_text(&item, "mapPublicIpOnLaunch")
                        .map(|v| v == "true")
                        .unwrap_or(false),
                });
            }
        }
        Ok(subnets)
    }

    pub async fn delete_subnet(&self, subnet_id: &str) -> Result<(), AwsError> {
        self.query(&Params::action("DeleteSubnet", EC2_VERSION).add("SubnetId", subnet_id))
            .await
            .map(|_| ())
    }

    // ── Internet gateways & routing ───────────────────────────────────────────

    pub async fn create_internet_gateway(
        &self,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        let xml = self
            .query(
                &Params::action("CreateInternetGateway", EC2_VERSION)
                    .tag_spec("internet-gateway", tags),
            )
            .await?;
        xml_text(&xml, "internetGatewayId")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "internetGatewayId"))
    }

    pub async fn attach_internet_gateway(
        &self,
        igw_id: &str,
        vpc_id: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("AttachInternetGateway", EC2_VERSION)
                .add("InternetGatewayId", igw_id)
                .add("VpcId", vpc_id),
        )
        .await
        .map(|_| ())
    }

    pub async fn detach_internet_gateway(
        &self,
        igw_id: &str,
        vpc_id: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("DetachInternetGateway", EC2_VERSION)
                .add("InternetGatewayId", igw_id)
                .add("VpcId", vpc_id),
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_internet_gateway(&self, igw_id: &str) -> Result<(), AwsError> {
        self.query(
            &Params::action("DeleteInternetGateway", EC2_VERSION).add("InternetGatewayId", igw_id),
        )
        .await
        .map(|_| ())
    }

    pub async fn internet_gateways_for_vpc(&self, vpc_id: &str) -> Result<Vec<String>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeInternetGateways", EC2_VERSION)
                    .add("Filter.1.Name", "attachment.vpc-id")
                    .add("Filter.1.Value.1", vpc_id),
            )
            .await?;
        Ok(xml_all_texts(&xml, "internetGatewayId"))
    }

    pub async fn create_route_table(
        &self,
        vpc_id: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        let xml = self
            .query(
                &Params::action("CreateRouteTable", EC2_VERSION)
                    .add("VpcId", vpc_id)
                    .tag_spec("route-table", tags),
            )
            .await?;
        xml_text(&xml, "routeTableId")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "routeTableId"))
    }

    pub async fn create_default_route(
        &self,
        route_table_id: &str,
        igw_id: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("CreateRoute", EC2_VERSION)
                .add("RouteTableId", route_table_id)
                .add("DestinationCidrBlock", "0.0.0.0/0")
                .add("GatewayId", igw_id),
        )
        .await
        .map(|_| ())
    }

    pub async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("AssociateRouteTable", EC2_VERSION)
                .add("RouteTableId", route_table_id)
                .add("SubnetId", subnet_id),
        )
        .await
        .map(|_| ())
    }

    pub async fn describe_route_tables(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<RouteTableInfo>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeRouteTables", EC2_VERSION)
                    .add("Filter.1.Name", "vpc-id")
                    .add("Filter.1.Value.1", vpc_id),
            )
            .await?;
        let mut tables = Vec::new();
        for set in xml_blocks(&xml, "routeTableSet") {
            for item in xml_blocks(&set, "item") {
                let Some(route_table_id) = xml_text(&item, "routeTableId") else {
                    continue;
                };
                let is_main = xml_blocks(&item, "associationSet")
                    .first()
                    .map(|assoc| xml_all_texts(assoc, "main").iter().any(|m| m == "true"))
                    .unwrap_or(false);
                let has_igw_route = xml_blocks(&item, "routeSet")
                    .first()
                    .map(|routes| {
                        xml_all_texts(routes, "gatewayId")
                            .iter()
                            .any(|g| g.starts_with("igw-"))
                    })
                    .unwrap_or(false);
                let associated_subnet_ids = xml_blocks(&item, "associationSet")
                    .first()
                    .map(|assoc| xml_all_texts(assoc, "subnetId"))
                    .unwrap_or_default();
                tables.push(RouteTableInfo {
                    route_table_id,
                    is_main,
                    has_igw_route,
                    associated_subnet_ids,
                });
            }
        }
        Ok(tables)
    }

    pub async fn delete_route_table(&self, route_table_id: &str) -> Result<(), AwsError> {
        self.query(
            &Params::action("DeleteRouteTable", EC2_VERSION).add("RouteTableId", route_table_id),
        )
        .await
        .map(|_| ())
    }

    // ── Network interfaces ────────────────────────────────────────────────────

    pub async fn describe_network_interfaces(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<NetworkInterfaceInfo>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeNetworkInterfaces", EC2_VERSION)
                    .add("Filter.1.Name", "vpc-id")
                    .add("Filter.1.Value.1", vpc_id),
            )
            .await?;
        let mut interfaces = Vec::new();
        for set in xml_blocks(&xml, "networkInterfaceSet") {
            for item in xml_blocks(&set, "item") {
                let Some(network_interface_id) = xml_text(&item, "networkInterfaceId") else {
                    continue;
                };
                let attachment = xml_blocks(&item, "attachment").into_iter().next();
                let (attachment_id, attached) = match attachment {
                    Some(ref a) => (
                        xml_text(a, "attachmentId"),
                        xml_text(a, "status").as_deref() == Some("attached"),
                    ),
                    None => (None, false),
                };
                interfaces.push(NetworkInterfaceInfo {
                    network_interface_id,
                    status: xml_text(&item, "status").unwrap_or_default(),
                    attachment_id,
                    attached,
                });
            }
        }
        Ok(interfaces)
    }

    pub async fn detach_network_interface(&self, attachment_id: &str) -> Result<(), AwsError> {
        self.query(
            &Params::action("DetachNetworkInterface", EC2_VERSION)
                .add("AttachmentId", attachment_id)
                .add("Force", "true"),
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_network_interface(&self, eni_id: &str) -> Result<(), AwsError> {
        self.query(
            &Params::action("DeleteNetworkInterface", EC2_VERSION)
                .add("NetworkInterfaceId", eni_id),
        )
        .await
        .map(|_| ())
    }

    // ── Tagging ───────────────────────────────────────────────────────────────

    pub async fn create_tags(
        &self,
        resource_id: &str,
        tags: &[(String, String)],
    ) -> Result<(), AwsError> {
        let mut params =
            Params::action("CreateTags", EC2_VERSION).add("ResourceId.1", resource_id);
        for (i, (key, value)) in tags.iter().enumerate() {
            let n = i + 1;
            params = params
                .add(format!("Tag.{n}.Key"), key)
                .add(format!("Tag.{n}.Value"), value);
        }
        self.query(&params).await.map(|_| ())
    }

    // ── Region facts ──────────────────────────────────────────────────────────

    pub async fn describe_availability_zones(&self) -> Result<Vec<String>, AwsError> {
        let xml = self
            .query(&Params::action("DescribeAvailabilityZones", EC2_VERSION))
            .await?;
        Ok(xml_all_texts(&xml, "zoneName"))
    }

    pub async fn describe_regions(&self) -> Result<Vec<String>, AwsError> {
        let xml = self.query(&Params::action("DescribeRegions", EC2_VERSION)).await?;
        Ok(xml_all_texts(&xml, "regionName"))
    }

    pub async fn instance_type_exists(&self, instance_type: &str) -> Result<bool, AwsError> {
        let result = self
            .query(
                &Params::action("DescribeInstanceTypes", EC2_VERSION)
                    .add("InstanceType.1", instance_type),
            )
            .await;
        match result {
            Ok(xml) => Ok(!xml_all_texts(&xml, "instanceType").is_empty()),
            Err(e) if e.is_code("InvalidInstanceType") => Ok(false),
            Err(e) => {
                warn!(instance_type, error = %e, "instance type lookup failed");
                Err(e)
            }
        }
    }

    pub async fn list_key_pairs(&self) -> Result<Vec<String>, AwsError> {
        let xml = self.query(&Params::action("DescribeKeyPairs", EC2_VERSION)).await?;
        Ok(xml_all_texts(&xml, "keyName"))
    }
}

// ── Response parsing ──────────────────────────────────────────────────────────

pub(crate) fn parse_tag_map(block: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    if let Some(tag_set) = xml_blocks(block, "tagSet").first() {
        for item in xml_blocks(tag_set, "item") {
            if let (Some(key), Some(value)) = (xml_text(&item, "key"), xml_text(&item, "value")) {
                tags.insert(key, value);
            }
        }
    }
    tags
}

fn parse_instance_blocks(xml: &str) -> Vec<InstanceInfo> {
    let mut instances = Vec::new();
    for set in xml_blocks(xml, "instancesSet") {
        for item in xml_blocks(&set, "item") {
            let Some(instance_id) = xml_text(&item, "instanceId") else {
                continue;
            };
            let state = xml_blocks(&item, "instanceState")
                .first()
                .and_then(|b| xml_text(b, "name"))
                .unwrap_or_else(|| "unknown".into());
            instances.push(InstanceInfo {
                instance_id,
                state,
                instance_type: xml_text(&item, "instanceType").unwrap_or_default(),
                public_ip: xml_text(&item, "ipAddress"),
                private_ip: xml_text(&item, "privateIpAddress"),
                launch_time: xml_text(&item, "launchTime")
                    .and_then(|t| t.parse::<DateTime<Utc>>().ok()),
                tags: parse_tag_map(&item),
            });
        }
    }
    instances
}

fn parse_vpc_blocks(xml: &str) -> Vec<VpcInfo> {
    let mut vpcs = Vec::new();
    for set in xml_blocks(xml, "vpcSet") {
        for item in xml_blocks(&set, "item") {
            let Some(vpc_id) = xml_text(&item, "vpcId") else {
                continue;
            };
            vpcs.push(VpcInfo {
                vpc_id,
                cidr_block: xml_text(&item, "cidrBlock").unwrap_or_default(),
                state: xml_text(&item, "state").unwrap_or_default(),
                is_default: xml_text(&item, "isDefault").as_deref() == Some("true"),
                tags: parse_tag_map(&item),
            });
        }
    }
    vpcs
}

fn parse_image_blocks(xml: &str) -> Vec<ImageInfo> {
    let mut images = Vec::new();
    for set in xml_blocks(xml, "imagesSet") {
        for item in xml_blocks(&set, "item") {
            let Some(image_id) = xml_text(&item, "imageId") else {
                continue;
            };
            images.push(ImageInfo {
                image_id,
                name: xml_text(&item, "name").unwrap_or_default(),
                state: xml_text(&item, "imageState").unwrap_or_default(),
                creation_date: xml_text(&item, "creationDate").unwrap_or_default(),
                root_device_name: xml_text(&item, "rootDeviceName"),
            });
        }
    }
    images
}
