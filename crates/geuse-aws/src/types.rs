//! Plain data shapes returned by the resource services.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct VpcInfo {
    pub vpc_id: String,
    pub cidr_block: String,
    pub state: String,
    pub is_default: bool,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubnetInfo {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub cidr_block: String,
    pub map_public_ip_on_launch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteTableInfo {
    pub route_table_id: String,
    pub is_main: bool,
    pub has_igw_route: bool,
    pub associated_subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkInterfaceInfo {
    pub network_interface_id: String,
    pub status: String,
    pub attachment_id: Option<String>,
    pub attached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub state: String,
    pub instance_type: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub launch_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStatusInfo {
    pub instance_id: String,
    pub instance_state: String,
    pub instance_status: String,
    pub system_status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroupInfo {
    pub group_id: String,
    pub group_name: String,
    pub vpc_id: String,
    /// `from_port` values of TCP ingress rules.
    pub open_tcp_ports: Vec<u16>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub image_id: String,
    pub name: String,
    pub state: String,
    pub creation_date: String,
    pub root_device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileSystemInfo {
    pub file_system_id: String,
    pub life_cycle_state: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MountTargetInfo {
    pub mount_target_id: String,
    pub file_system_id: String,
    pub subnet_id: String,
    pub life_cycle_state: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancerInfo {
    pub load_balancer_arn: String,
    pub dns_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetHealthInfo {
    pub target_id: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionInfo {
    pub distribution_id: String,
    pub domain_name: String,
    pub status: String,
}

/// A simulated IAM action and its evaluation decision.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedAction {
    pub action: String,
    pub decision: String,
}

/// Parameters for a single instance launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    /// Gzip-compressed user data; base64-encoded on the wire.
    pub user_data: Vec<u8>,
    pub iam_instance_profile_name: Option<String>,
    pub key_name: Option<String>,
    pub availability_zone: Option<String>,
    pub spot: bool,
    pub root_device_name: String,
    pub root_volume_gib: u32,
    pub tags: Vec<(String, String)>,
}
