//! Pre-deployment checks: credentials, permissions, quotas, region services,
//! configuration, naming conflicts, and existing-network topology.

use std::sync::Arc;
use std::time::Instant;

use geuse_aws::{
    AwsClient, Ec2Service, EfsService, ElbService, IamService, QuotaService,
    SecurityGroupService,
};
use geuse_domain::{
    config::is_valid_stack_name, DeploymentConfig, Severity, ValidationCheck, ValidationReport,
};
use geuse_store::StateStore;
use tracing::{debug, info};

/// Actions simulated against the caller's principal.
const REQUIRED_ACTIONS: &[&str] = &[
    "ec2:RunInstances",
    "ec2:DescribeVpcs",
    "ec2:DescribeSubnets",
    "ec2:CreateSecurityGroup",
    "ec2:DescribeSecurityGroups",
    "elasticfilesystem:CreateFileSystem",
    "elasticfilesystem:DescribeFileSystems",
    "elasticloadbalancing:DescribeLoadBalancers",
    "servicequotas:GetServiceQuota",
    "sts:GetCallerIdentity",
];

/// (service code, quota code, label)
const CHECKED_QUOTAS: &[(&str, &str, &str)] = &[
    ("ec2", "L-1216C47A", "EC2 standard instances"),
    ("ec2", "L-0263D0A3", "Elastic IP addresses"),
    ("elasticfilesystem", "L-6C5AE51C", "EFS file systems"),
];

/// Ports a reused security group must already expose.
const REQUIRED_SG_PORTS: &[u16] = &[22, 80, 5678, 2049];

pub struct PreDeploymentValidator {
    region: String,
    iam: IamService,
    ec2: Ec2Service,
    efs: EfsService,
    elb: ElbService,
    sg: SecurityGroupService,
    quotas: QuotaService,
    store: StateStore,
}

impl PreDeploymentValidator {
    pub fn new(client: Arc<AwsClient>, store: StateStore) -> Self {
        Self {
            region: client.region().to_string(),
            iam: IamService::new(client.clone()),
            ec2: Ec2Service::new(client.clone()),
            efs: EfsService::new(client.clone()),
            elb: ElbService::new(client.clone()),
            sg: SecurityGroupService::new(client.clone()),
            quotas: QuotaService::new(client),
            store,
        }
    }

    /// Run every check in order. The report fails iff an error-severity check
    /// failed; warnings pass through.
    pub async fn validate(&self, config: &DeploymentConfig) -> ValidationReport {
        let started = Instant::now();
        let mut report = ValidationReport::new();
        report.deployment_name = Some(config.stack_name.clone());

        let (credentials_check, identity_arn) = self.check_credentials().await;
        report.add(credentials_check);
        report.add(self.check_permissions(identity_arn.as_deref()).await);
        report.add(self.check_quotas().await);
        report.add(self.check_region_services().await);
        report.add(self.check_config(config).await);
        report.add(self.check_naming_conflicts(config).await);
        for check in self.check_existing_vpc(config).await {
            report.add(check);
        }

        report.validation_duration_seconds = Some(started.elapsed().as_secs_f64());
        info!(
            stack = %config.stack_name,
            passed = report.passed(),
            checks = report.checks.len(),
            "pre-deployment validation finished"
        );
        report
    }

    async fn check_credentials(&self) -> (ValidationCheck, Option<String>) {
        match self.iam.get_caller_identity().await {
            Ok(identity) => (
                ValidationCheck::passed(
                    "credentials",
                    format!("Credentials valid for account {}", identity.account),
                )
                .with_details(identity.arn.clone()),
                Some(identity.arn),
            ),
            Err(e) => {
                debug!(error = %e, "credential validation failed");
                (
                    ValidationCheck::failed(
                        "credentials",
                        format!("Credential validation failed: {e}"),
                        "Configure AWS credentials or refresh expired tokens.",
                    ),
                    None,
                )
            }
        }
    }

    async fn check_permissions(&self, identity_arn: Option<&str>) -> ValidationCheck {
        let Some(arn) = identity_arn else {
            return ValidationCheck::failed(
                "permissions",
                "Permission simulation skipped because identity is unknown.",
                "Resolve credentials before validating permissions.",
            )
            .with_severity(Severity::Warning);
        };

        let results = match self.iam.simulate_principal_policy(arn, REQUIRED_ACTIONS).await {
            Ok(results) if !results.is_empty() => results,
            Ok(_) => {
                return ValidationCheck::failed(
                    "permissions",
                    "Permission validation unavailable (no evaluation results returned).",
                    "Ensure iam:SimulatePrincipalPolicy is allowed or validate manually.",
                )
                .with_severity(Severity::Warning)
            }
            Err(e) => {
                return ValidationCheck::failed(
                    "permissions",
                    format!("Permission validation unavailable: {e}"),
                    "Ensure iam:SimulatePrincipalPolicy is allowed or validate manually.",
                )
                .with_severity(Severity::Warning)
            }
        };

        let mut denied: Vec<String> = Vec::new();
        let mut implicit: Vec<String> = Vec::new();
        for result in results {
            match result.decision.to_ascii_lowercase().as_str() {
                "allowed" => {}
                "implicitdeny" => implicit.push(result.action),
                _ => denied.push(result.action),
            }
        }

        if denied.is_empty() && implicit.is_empty() {
            return ValidationCheck::passed(
                "permissions",
                "IAM permissions validated for required actions.",
            );
        }

        let mut hints = Vec::new();
        if !denied.is_empty() {
            hints.push(format!("explicitly denied: {}", denied.join(", ")));
        }
        if !implicit.is_empty() {
            hints.push(format!("implicit denies: {}", implicit.join(", ")));
        }
        let missing: Vec<String> = denied.into_iter().chain(implicit).collect();
        ValidationCheck::failed(
            "permissions",
            format!("Missing required permissions ({}).", hints.join("; ")),
            "Grant the required IAM permissions for deployment actions.",
        )
        .with_details(missing.join(", "))
    }

    async fn check_quotas(&self) -> ValidationCheck {
        let mut failures: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for (service_code, quota_code, label) in CHECKED_QUOTAS {
            match self.quotas.get_service_quota(service_code, quota_code).await {
                Ok(value) if value < 1.0 => failures.push(format!("{label} quota too low")),
                Ok(_) => {}
                Err(e) if e.is_code("NoSuchResourceException") || e.is_code("does not exist") => {
                    warnings.push(format!("{label} quota check skipped (API limitation)"));
                }
                Err(e) => warnings.push(format!("{label} check unavailable: {e}")),
            }
        }

        if !failures.is_empty() {
            return ValidationCheck::failed(
                "quotas",
                "Quota checks failed.",
                "Request quota increases before deployment.",
            )
            .with_details(failures.join("; "));
        }
        if !warnings.is_empty() {
            let mut check = ValidationCheck::passed("quotas", "Quota checks passed with warnings.")
                .with_details(warnings.join("; "));
            check.remediation = Some("Verify quotas manually if deployment fails.".into());
            check.severity = Severity::Warning;
            return check;
        }
        ValidationCheck::passed("quotas", "Quotas sufficient for deployment.")
    }

    async fn check_region_services(&self) -> ValidationCheck {
        match self.ec2.describe_regions().await {
            Ok(regions) if !regions.contains(&self.region) => {
                return ValidationCheck::failed(
                    "region_services",
                    format!("Region {} is not available.", self.region),
                    "Choose a supported AWS region.",
                )
            }
            Ok(_) => {}
            Err(e) => {
                return ValidationCheck::failed(
                    "region_services",
                    format!("Unable to verify region availability: {e}"),
                    "Check AWS connectivity and credentials.",
                )
            }
        }

        let mut issues: Vec<String> = Vec::new();
        if let Err(e) = self.ec2.describe_availability_zones().await {
            issues.push(format!("EC2 unavailable: {e}"));
        }
        if let Err(e) = self.efs.describe_file_systems().await {
            issues.push(format!("EFS unavailable: {e}"));
        }
        if let Err(e) = self.elb.describe_load_balancers_probe().await {
            issues.push(format!("ELBv2 unavailable: {e}"));
        }

        if issues.is_empty() {
            ValidationCheck::passed(
                "region_services",
                format!("Region {} supports required services.", self.region),
            )
        } else {
            ValidationCheck::failed(
                "region_services",
                "Service availability issues detected.",
                "Select a different region or enable the required services.",
            )
            .with_details(issues.join("; "))
        }
    }

    async fn check_config(&self, config: &DeploymentConfig) -> ValidationCheck {
        let mut errors: Vec<String> = Vec::new();

        if !is_valid_stack_name(&config.stack_name) {
            errors.push(
                "Stack name must start with a letter and contain only letters, numbers, and dashes."
                    .into(),
            );
        }

        match self.ec2.describe_regions().await {
            Ok(regions) if !regions.contains(&config.region) => {
                errors.push(format!("Region {} is not valid or enabled.", config.region));
            }
            Ok(_) => {}
            Err(_) => errors.push("Could not verify region validity.".into()),
        }

        match self.ec2.instance_type_exists(&config.instance_type).await {
            Ok(true) => {}
            _ => errors.push(format!(
                "Instance type {} not available in {}.",
                config.instance_type, config.region
            )),
        }

        if errors.is_empty() {
            ValidationCheck::passed("config", "Configuration values are valid.")
        } else {
            ValidationCheck::failed(
                "config",
                "Configuration validation failed.",
                "Update the deployment config to use supported values.",
            )
            .with_details(errors.join("; "))
        }
    }

    async fn check_naming_conflicts(&self, config: &DeploymentConfig) -> ValidationCheck {
        let mut conflicts: Vec<String> = Vec::new();

        if self.store.deployment_path(&config.stack_name).exists() {
            conflicts.push("Local deployment state already exists with this name.".into());
        }

        match self.ec2.find_vpcs_by_name_tag(&config.stack_name).await {
            Ok(vpcs) => {
                let matching = vpcs
                    .into_iter()
                    .filter(|vpc| config.vpc_id.as_deref() != Some(vpc.vpc_id.as_str()))
                    .count();
                if matching > 0 {
                    conflicts.push("VPC with matching Name tag already exists.".into());
                }
            }
            Err(_) => conflicts.push("Could not verify VPC naming conflicts.".into()),
        }

        if conflicts.is_empty() {
            ValidationCheck::passed("naming_conflicts", "No naming conflicts detected.")
        } else {
            ValidationCheck::failed(
                "naming_conflicts",
                "Naming conflicts detected.",
                "Use a unique stack name or clean up existing resources.",
            )
            .with_details(conflicts.join("; "))
        }
    }

    async fn check_existing_vpc(&self, config: &DeploymentConfig) -> Vec<ValidationCheck> {
        let Some(vpc_id) = config.vpc_id.as_deref() else {
            return vec![];
        };
        let mut checks = Vec::new();

        let vpc = match self.ec2.describe_vpc(vpc_id).await {
            Ok(vpc) => vpc,
            Err(e) => {
                return vec![ValidationCheck::failed(
                    "vpc_exists",
                    format!("VPC {vpc_id} not found or inaccessible: {e}"),
                    "Provide a reachable VPC id or omit vpc_id to create one.",
                )]
            }
        };

        if vpc.state == "available" {
            checks.push(ValidationCheck::passed(
                "vpc_state",
                "VPC is in available state.",
            ));
        } else {
            checks.push(ValidationCheck::failed(
                "vpc_state",
                format!("VPC is in {} state.", vpc.state),
                "Wait for the VPC to become available.",
            ));
        }

        let mut missing_tags: Vec<&str> = Vec::new();
        if !vpc.tags.contains_key("geusemaker:deployment") {
            missing_tags.push("geusemaker:deployment");
        }
        if !vpc.tags.contains_key("geusemaker:tier") {
            missing_tags.push("geusemaker:tier");
        }
        if missing_tags.is_empty() {
            checks.push(ValidationCheck::passed("vpc_tags", "VPC tags present."));
        } else {
            let mut check = ValidationCheck::failed(
                "vpc_tags",
                format!("VPC missing tags: {}", missing_tags.join(", ")),
                "The VPC will be tagged during configuration.",
            );
            check.severity = Severity::Warning;
            checks.push(check);
        }

        let igws = self
            .ec2
            .internet_gateways_for_vpc(vpc_id)
            .await
            .unwrap_or_default();
        let has_igw = !igws.is_empty();
        if has_igw {
            checks.push(ValidationCheck::passed(
                "vpc_internet_gateway",
                "Internet gateway is attached.",
            ));
        } else if config.attach_internet_gateway {
            checks.push(
                ValidationCheck::failed(
                    "vpc_internet_gateway",
                    "No internet gateway attached; one will be attached during deployment.",
                    "Ensure permissions allow creating and attaching an internet gateway.",
                )
                .with_severity(Severity::Warning),
            );
        } else {
            checks.push(ValidationCheck::failed(
                "vpc_internet_gateway",
                "No internet gateway attached to the VPC.",
                "Attach an internet gateway or rerun deploy with --attach-internet-gateway.",
            ));
        }

        let subnets = self.ec2.describe_subnets(vpc_id).await.unwrap_or_default();
        let subnet_ids: Vec<&str> = subnets.iter().map(|s| s.subnet_id.as_str()).collect();
        if subnet_ids.is_empty() {
            checks.push(ValidationCheck::failed(
                "vpc_subnets",
                "No subnets found in the VPC.",
                "Create at least one subnet or omit vpc_id for automatic creation.",
            ));
        } else {
            checks.push(ValidationCheck::passed(
                "vpc_subnets",
                format!("{} subnets discovered.", subnet_ids.len()),
            ));
        }

        for (check_name, requested) in [
            ("vpc_public_subnets", config.public_subnet_ids.as_ref()),
            ("vpc_private_subnets", config.private_subnet_ids.as_ref()),
        ] {
            let Some(requested) = requested else { continue };
            let missing: Vec<&str> = requested
                .iter()
                .map(String::as_str)
                .filter(|id| !subnet_ids.contains(id))
                .collect();
            if missing.is_empty() {
                checks.push(ValidationCheck::passed(
                    check_name,
                    "All requested subnets are present.",
                ));
            } else {
                checks.push(ValidationCheck::failed(
                    check_name,
                    format!("Missing subnets: {}", missing.join(", ")),
                    "Ensure the subnet ids belong to the selected VPC.",
                ));
            }
        }

        let route_tables = self.ec2.describe_route_tables(vpc_id).await.unwrap_or_default();
        let has_public_route = route_tables.iter().any(|rt| rt.has_igw_route);
        if has_public_route {
            checks.push(ValidationCheck::passed(
                "vpc_routes",
                "Public routing through an internet gateway is present.",
            ));
        } else if config.attach_internet_gateway {
            checks.push(
                ValidationCheck::failed(
                    "vpc_routes",
                    "No public route present; one will be created during deployment.",
                    "Ensure permissions allow route table changes.",
                )
                .with_severity(Severity::Warning),
            );
        } else {
            checks.push(ValidationCheck::failed(
                "vpc_routes",
                "No route table routes traffic through an internet gateway.",
                "Add a 0.0.0.0/0 route to an internet gateway or pass --attach-internet-gateway.",
            ));
        }

        if let Some(storage_subnet) = config.storage_subnet_id.as_deref() {
            if subnet_ids.contains(&storage_subnet) {
                checks.push(ValidationCheck::passed(
                    "vpc_storage_subnet",
                    "Storage subnet belongs to the VPC.",
                ));
            } else {
                checks.push(ValidationCheck::failed(
                    "vpc_storage_subnet",
                    format!("Storage subnet {storage_subnet} is not part of the VPC."),
                    "Pick a subnet inside the selected VPC for the mount target.",
                ));
            }
        }

        if let Some(sg_id) = config.security_group_id.as_deref() {
            match self.sg.describe_security_group(sg_id).await {
                Ok(info) if info.vpc_id != vpc_id => {
                    checks.push(ValidationCheck::failed(
                        "vpc_security_group",
                        format!("Security group {sg_id} belongs to {} not {vpc_id}.", info.vpc_id),
                        "Reuse a security group from the selected VPC.",
                    ));
                }
                Ok(info) => {
                    let missing: Vec<String> = REQUIRED_SG_PORTS
                        .iter()
                        .filter(|p| !info.open_tcp_ports.contains(p))
                        .map(|p| p.to_string())
                        .collect();
                    if missing.is_empty() {
                        checks.push(ValidationCheck::passed(
                            "vpc_security_group",
                            "Reused security group exposes the required ports.",
                        ));
                    } else {
                        checks.push(ValidationCheck::failed(
                            "vpc_security_group",
                            format!("Security group missing ingress ports: {}", missing.join(", ")),
                            "Open ports 22, 80, 5678, and 2049 on the reused group.",
                        ));
                    }
                }
                Err(e) => {
                    checks.push(ValidationCheck::failed(
                        "vpc_security_group",
                        format!("Security group {sg_id} not found: {e}"),
                        "Provide a reachable security group id.",
                    ));
                }
            }
        }

        checks
    }
}
