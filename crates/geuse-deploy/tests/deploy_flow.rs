//! End-to-end pipeline runs against a mocked provider.

use std::sync::Arc;
use std::time::Duration;

use geuse_aws::creds::StaticCredentialsProvider;
use geuse_aws::{AwsClient, AwsCredentials, BaseUrls};
use geuse_deploy::{DeployError, Orchestrator, Services};
use geuse_domain::{
    DeploymentConfig, DeploymentStatus, Provenance, ResourceKind, Tier,
};
use geuse_market::{CapacityService, PricingService, SelectionEngine};
use geuse_store::StateStore;
use rust_decimal::Decimal;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(url: &str) -> Arc<AwsClient> {
    Arc::new(AwsClient::with_base_urls(
        "us-east-1",
        reqwest::Client::new(),
        Arc::new(StaticCredentialsProvider(AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        })),
        BaseUrls::single(url),
    ))
}

fn orchestrator(url: &str, dir: &TempDir) -> Orchestrator {
    let client = test_client(url);
    let pricing = Arc::new(PricingService::new(client.clone()));
    let capacity = Arc::new(CapacityService::new(client.clone(), pricing));
    let selection = Arc::new(SelectionEngine::new(capacity));
    let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
    let mut services = Services::new(client.clone(), selection, store);
    services.launch_retry_delay = Duration::from_millis(1);
    Orchestrator::new(client, services)
}

fn spot_config(stack: &str) -> DeploymentConfig {
    DeploymentConfig::new(stack, Tier::Dev, "us-east-1").unwrap()
}

async fn ec2_ok(server: &MockServer, action: &str, body: &str) {
    Mock::given(method("POST"))
        .and(body_string_contains(format!("Action={action}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

/// Everything a fresh Tier-1 deploy touches, up to (but excluding) the real
/// instance launch.
async fn mount_tier1_mocks(server: &MockServer) {
    // Market data: spot at 0.0125 in us-east-1a, catalogue down (fallback
    // on-demand 0.0416), no placement scores.
    ec2_ok(
        server,
        "DescribeSpotPriceHistory",
        r#"<DescribeSpotPriceHistoryResponse><spotPriceHistorySet>
        <item><instanceType>t3.medium</instanceType><availabilityZone>us-east-1a</availabilityZone><spotPrice>0.0125</spotPrice><timestamp>2026-01-01T00:00:00.000Z</timestamp></item>
        </spotPriceHistorySet></DescribeSpotPriceHistoryResponse>"#,
    )
    .await;
    Mock::given(method("POST"))
        .and(body_string_contains("GetProducts"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({})))
        .mount(server)
        .await;
    ec2_ok(
        server,
        "GetSpotPlacementScores",
        "<GetSpotPlacementScoresResponse></GetSpotPlacementScoresResponse>",
    )
    .await;
    // Capacity dry-run would succeed.
    Mock::given(method("POST"))
        .and(body_string_contains("Action=RunInstances"))
        .and(body_string_contains("DryRun=true"))
        .respond_with(ResponseTemplate::new(412).set_body_string(
            "<Response><Errors><Error><Code>DryRunOperation</Code><Message>ok</Message></Error></Errors></Response>",
        ))
        .mount(server)
        .await;
    // Image lookups: one base image regardless of filter.
    ec2_ok(
        server,
        "DescribeImages",
        r#"<DescribeImagesResponse><imagesSet><item>
        <imageId>ami-base</imageId><name>Deep Learning Base AMI (Ubuntu 22.04) 20260101</name>
        <imageState>available</imageState><creationDate>2026-01-01T00:00:00.000Z</creationDate>
        <rootDeviceName>/dev/sda1</rootDeviceName>
        </item></imagesSet></DescribeImagesResponse>"#,
    )
    .await;

    // Network.
    ec2_ok(
        server,
        "CreateVpc",
        "<CreateVpcResponse><vpc><vpcId>vpc-new</vpcId></vpc></CreateVpcResponse>",
    )
    .await;
    ec2_ok(server, "ModifyVpcAttribute", "<ModifyVpcAttributeResponse/>").await;
    ec2_ok(
        server,
        "DescribeAvailabilityZones",
        "<DescribeAvailabilityZonesResponse><availabilityZoneInfo><item><zoneName>us-east-1a</zoneName></item><item><zoneName>us-east-1b</zoneName></item></availabilityZoneInfo></DescribeAvailabilityZonesResponse>",
    )
    .await;
    ec2_ok(
        server,
        "CreateInternetGateway",
        "<CreateInternetGatewayResponse><internetGateway><internetGatewayId>igw-new</internetGatewayId></internetGateway></CreateInternetGatewayResponse>",
    )
    .await;
    ec2_ok(server, "AttachInternetGateway", "<AttachInternetGatewayResponse/>").await;
    for (cidr, subnet_id) in [
        ("10.0.1.0%2F24", "subnet-pub1"),
        ("10.0.2.0%2F24", "subnet-pub2"),
        ("10.0.101.0%2F24", "subnet-priv1"),
        ("10.0.102.0%2F24", "subnet-priv2"),
    ] {
        Mock::given(method("POST"))
            .and(body_string_contains("Action=CreateSubnet"))
            .and(body_string_contains(format!("CidrBlock={cidr}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<CreateSubnetResponse><subnet><subnetId>{subnet_id}</subnetId></subnet></CreateSubnetResponse>"
            )))
            .mount(server)
            .await;
    }
    ec2_ok(server, "ModifySubnetAttribute", "<ModifySubnetAttributeResponse/>").await;
    ec2_ok(
        server,
        "CreateRouteTable",
        "<CreateRouteTableResponse><routeTable><routeTableId>rtb-public</routeTableId></routeTable></CreateRouteTableResponse>",
    )
    .await;
    ec2_ok(server, "CreateRoute", "<CreateRouteResponse><return>true</return></CreateRouteResponse>").await;
    ec2_ok(
        server,
        "AssociateRouteTable",
        "<AssociateRouteTableResponse><associationId>rtbassoc-1</associationId></AssociateRouteTableResponse>",
    )
    .await;

    // Security group.
    ec2_ok(
        server,
        "CreateSecurityGroup",
        "<CreateSecurityGroupResponse><groupId>sg-new</groupId></CreateSecurityGroupResponse>",
    )
    .await;
    ec2_ok(
        server,
        "AuthorizeSecurityGroupIngress",
        "<AuthorizeSecurityGroupIngressResponse><return>true</return></AuthorizeSecurityGroupIngressResponse>",
    )
    .await;

    // Storage.
    Mock::given(method("POST"))
        .and(path("/2015-02-01/file-systems"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "FileSystemId": "fs-new",
            "LifeCycleState": "creating"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2015-02-01/file-systems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "FileSystems": [{ "FileSystemId": "fs-new", "LifeCycleState": "available" }]
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2015-02-01/mount-targets"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "MountTargetId": "fsmt-new",
            "LifeCycleState": "creating"
        })))
        .mount(server)
        .await;

    // IAM.
    ec2_ok(
        server,
        "CreateRole",
        "<CreateRoleResponse><Role><Arn>arn:aws:iam::1:role/demo-efs-mount-role</Arn></Role></CreateRoleResponse>",
    )
    .await;
    ec2_ok(server, "AttachRolePolicy", "<AttachRolePolicyResponse/>").await;
    ec2_ok(server, "PutRolePolicy", "<PutRolePolicyResponse/>").await;
    ec2_ok(
        server,
        "CreateInstanceProfile",
        "<CreateInstanceProfileResponse><InstanceProfile><Arn>arn:aws:iam::1:instance-profile/demo-instance-profile</Arn></InstanceProfile></CreateInstanceProfileResponse>",
    )
    .await;
    ec2_ok(server, "AddRoleToInstanceProfile", "<AddRoleToInstanceProfileResponse/>").await;
    ec2_ok(
        server,
        "GetInstanceProfile",
        "<GetInstanceProfileResponse><InstanceProfile><Roles><member><RoleName>demo-efs-mount-role</RoleName></member></Roles></InstanceProfile></GetInstanceProfileResponse>",
    )
    .await;
}

/// Mount-target describes for the happy path: always available with an IP.
async fn mount_target_available(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/2015-02-01/mount-targets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "MountTargets": [{
                "MountTargetId": "fsmt-new",
                "FileSystemId": "fs-new",
                "SubnetId": "subnet-pub1",
                "LifeCycleState": "available",
                "IpAddress": "10.0.1.5"
            }]
        })))
        .mount(server)
        .await;
}

async fn instance_running(server: &MockServer) {
    // Real launch: distinguished from the dry-run by the UserData parameter.
    Mock::given(method("POST"))
        .and(body_string_contains("Action=RunInstances"))
        .and(body_string_contains("UserData="))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<RunInstancesResponse><instancesSet><item><instanceId>i-new</instanceId></item></instancesSet></RunInstancesResponse>",
        ))
        .mount(server)
        .await;
    ec2_ok(
        server,
        "DescribeInstances",
        r#"<DescribeInstancesResponse><reservationSet><item><instancesSet><item>
        <instanceId>i-new</instanceId>
        <instanceState><name>running</name></instanceState>
        <instanceType>t3.medium</instanceType>
        <privateIpAddress>10.0.1.10</privateIpAddress>
        <ipAddress>54.1.2.3</ipAddress>
        </item></instancesSet></item></reservationSet></DescribeInstancesResponse>"#,
    )
    .await;
}

#[tokio::test]
async fn fresh_tier1_deploy_with_spot() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_tier1_mocks(&server).await;
    mount_target_available(&server).await;
    instance_running(&server).await;

    let orchestrator = orchestrator(&server.uri(), &dir);
    let state = orchestrator
        .deploy(spot_config("demo"), true, None)
        .await
        .unwrap();

    assert_eq!(state.status, DeploymentStatus::Running);
    assert_eq!(state.vpc_id, "vpc-new");
    assert_eq!(state.subnet_ids.len(), 4);
    assert_eq!(state.security_group_id, "sg-new");
    assert_eq!(state.efs_id, "fs-new");
    assert_eq!(state.efs_mount_target_id, "fsmt-new");
    assert_eq!(state.efs_mount_target_ip.as_deref(), Some("10.0.1.5"));
    assert_eq!(state.instance_id, "i-new");
    assert_eq!(state.public_ip.as_deref(), Some("54.1.2.3"));
    assert_eq!(state.n8n_url, "https://54.1.2.3");
    assert!(state.https_enabled);

    // The spot selection flowed through to cost tracking.
    assert!(state.cost.is_spot);
    assert_eq!(
        state.cost.spot_price_per_hour,
        Some("0.0125".parse::<Decimal>().unwrap())
    );
    assert_eq!(
        state.cost.on_demand_price_per_hour,
        "0.0416".parse::<Decimal>().unwrap()
    );

    // Provenance: everything created this run.
    let prov = &state.resource_provenance;
    assert_eq!(prov.get(ResourceKind::Vpc), Some(Provenance::Created));
    assert_eq!(prov.get(ResourceKind::SecurityGroup), Some(Provenance::Created));
    assert_eq!(prov.get(ResourceKind::Efs), Some(Provenance::Created));
    assert_eq!(prov.get(ResourceKind::Instance), Some(Provenance::Created));

    // Compute landed in the spot-selected AZ's subnet (first public subnet).
    let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
    let reloaded = store.load_sync("demo", true).unwrap().unwrap();
    assert_eq!(reloaded.instance_id, "i-new");
}

#[tokio::test]
async fn launch_failure_after_checkpoint_triggers_cleanup() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_tier1_mocks(&server).await;

    // Mount-target describes: available for the storage stage (two reads),
    // then gone once cleanup has deleted it.
    Mock::given(method("GET"))
        .and(path("/2015-02-01/mount-targets"))
        .and(query_param("MountTargetId", "fsmt-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "MountTargets": [{
                "MountTargetId": "fsmt-new",
                "FileSystemId": "fs-new",
                "SubnetId": "subnet-pub1",
                "LifeCycleState": "available",
                "IpAddress": "10.0.1.5"
            }]
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2015-02-01/mount-targets"))
        .and(query_param("MountTargetId", "fsmt-new"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "ErrorCode": "MountTargetNotFound", "Message": "gone"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2015-02-01/mount-targets"))
        .and(query_param("FileSystemId", "fs-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "MountTargets": [{
                "MountTargetId": "fsmt-new",
                "FileSystemId": "fs-new",
                "SubnetId": "subnet-pub1",
                "LifeCycleState": "available",
                "IpAddress": "10.0.1.5"
            }]
        })))
        .mount(&server)
        .await;

    // The real launch keeps failing with an identity-propagation error.
    Mock::given(method("POST"))
        .and(body_string_contains("Action=RunInstances"))
        .and(body_string_contains("UserData="))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            "<Response><Errors><Error><Code>InvalidParameterValue</Code><Message>Value (demo-instance-profile) for parameter iamInstanceProfile.name is invalid. Invalid IAM Instance Profile name</Message></Error></Errors></Response>",
        ))
        .expect(5)
        .mount(&server)
        .await;

    // Teardown calls issued by the compensating cleanup.
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204).set_body_string(""))
        .mount(&server)
        .await;
    ec2_ok(&server, "DeleteSecurityGroup", "<DeleteSecurityGroupResponse/>").await;
    ec2_ok(&server, "DeleteSubnet", "<DeleteSubnetResponse/>").await;
    ec2_ok(
        &server,
        "DescribeNetworkInterfaces",
        "<DescribeNetworkInterfacesResponse><networkInterfaceSet></networkInterfaceSet></DescribeNetworkInterfacesResponse>",
    )
    .await;
    ec2_ok(
        &server,
        "DescribeInternetGateways",
        "<DescribeInternetGatewaysResponse><internetGatewaySet><item><internetGatewayId>igw-new</internetGatewayId></item></internetGatewaySet></DescribeInternetGatewaysResponse>",
    )
    .await;
    ec2_ok(&server, "DetachInternetGateway", "<DetachInternetGatewayResponse/>").await;
    ec2_ok(&server, "DeleteInternetGateway", "<DeleteInternetGatewayResponse/>").await;
    ec2_ok(
        &server,
        "DescribeRouteTables",
        "<DescribeRouteTablesResponse><routeTableSet><item><routeTableId>rtb-public</routeTableId><associationSet></associationSet></item></routeTableSet></DescribeRouteTablesResponse>",
    )
    .await;
    ec2_ok(&server, "DeleteRouteTable", "<DeleteRouteTableResponse/>").await;
    ec2_ok(&server, "DeleteVpc", "<DeleteVpcResponse/>").await;

    let orchestrator = orchestrator(&server.uri(), &dir);
    let err = orchestrator
        .deploy(spot_config("demo"), true, None)
        .await
        .unwrap_err();

    let DeployError::Failed { stage, outcome, source } = &err else {
        panic!("expected a terminal failure, got {err:?}");
    };
    assert_eq!(*stage, "launch-instance");
    assert!(outcome.contains("Cleanup completed"), "outcome: {outcome}");
    assert!(matches!(
        **source,
        DeployError::LaunchRetriesExhausted { attempts: 5, .. }
    ));

    // No live record remains; exactly one archived snapshot exists.
    let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
    assert!(!store.deployment_path("demo").exists());
    let archives: Vec<_> = std::fs::read_dir(store.archive_dir()).unwrap().collect();
    assert_eq!(archives.len(), 1);
}

#[tokio::test]
async fn tier3_deploy_adds_load_balancer_and_cdn() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_tier1_mocks(&server).await;
    mount_target_available(&server).await;
    instance_running(&server).await;

    ec2_ok(
        &server,
        "CreateLoadBalancer",
        "<CreateLoadBalancerResponse><LoadBalancers><member><LoadBalancerArn>arn:lb</LoadBalancerArn><DNSName>demo-alb-1.us-east-1.elb.amazonaws.com</DNSName></member></LoadBalancers></CreateLoadBalancerResponse>",
    )
    .await;
    ec2_ok(
        &server,
        "CreateTargetGroup",
        "<CreateTargetGroupResponse><TargetGroups><member><TargetGroupArn>arn:tg</TargetGroupArn></member></TargetGroups></CreateTargetGroupResponse>",
    )
    .await;
    ec2_ok(
        &server,
        "CreateListener",
        "<CreateListenerResponse><Listeners><member><ListenerArn>arn:listener</ListenerArn></member></Listeners></CreateListenerResponse>",
    )
    .await;
    ec2_ok(&server, "RegisterTargets", "<RegisterTargetsResponse/>").await;
    ec2_ok(
        &server,
        "DescribeTargetHealth",
        "<DescribeTargetHealthResponse><DescribeTargetHealthResult><TargetHealthDescriptions><member><Target><Id>i-new</Id></Target><TargetHealth><State>healthy</State></TargetHealth></member></TargetHealthDescriptions></DescribeTargetHealthResult></DescribeTargetHealthResponse>",
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/2020-05-31/distribution"))
        .respond_with(ResponseTemplate::new(201).set_body_string(
            "<Distribution><Id>E123</Id><Status>InProgress</Status><DomainName>d111.cloudfront.net</DomainName></Distribution>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2020-05-31/distribution/E123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<Distribution><Id>E123</Id><Status>Deployed</Status><DomainName>d111.cloudfront.net</DomainName></Distribution>",
        ))
        .mount(&server)
        .await;

    let mut config = spot_config("demo");
    config.enable_alb = true;
    config.enable_cdn = true;
    config.alb_certificate_arn = Some("arn:aws:acm:us-east-1:1:certificate/abc".into());

    let orchestrator = orchestrator(&server.uri(), &dir);
    let state = orchestrator.deploy(config, true, None).await.unwrap();

    assert_eq!(state.alb_arn.as_deref(), Some("arn:lb"));
    assert_eq!(
        state.alb_dns.as_deref(),
        Some("demo-alb-1.us-east-1.elb.amazonaws.com")
    );
    assert_eq!(state.target_group_arn.as_deref(), Some("arn:tg"));
    assert_eq!(state.cloudfront_id.as_deref(), Some("E123"));
    assert_eq!(state.cloudfront_domain.as_deref(), Some("d111.cloudfront.net"));
    assert_eq!(state.n8n_url, "https://d111.cloudfront.net");
    assert!(state.https_enabled);

    let prov = &state.resource_provenance;
    assert_eq!(prov.get(ResourceKind::Alb), Some(Provenance::Created));
    assert_eq!(prov.get(ResourceKind::TargetGroup), Some(Provenance::Created));
    assert_eq!(prov.get(ResourceKind::HttpsListener), Some(Provenance::Created));
    assert_eq!(prov.get(ResourceKind::Cloudfront), Some(Provenance::Created));
}

#[tokio::test]
async fn cdn_without_load_balancer_is_rejected() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_tier1_mocks(&server).await;
    mount_target_available(&server).await;
    instance_running(&server).await;

    let mut config = spot_config("demo");
    config.enable_cdn = true; // but no load balancer
    config.auto_rollback_on_failure = false;

    let orchestrator = orchestrator(&server.uri(), &dir);
    let err = orchestrator.deploy(config, false, None).await.unwrap_err();
    let DeployError::Failed { stage, source, .. } = &err else {
        panic!("expected terminal failure, got {err:?}");
    };
    assert_eq!(*stage, "cdn");
    assert!(matches!(**source, DeployError::MissingPrecondition(_)));
}
