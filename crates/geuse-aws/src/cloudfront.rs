//! CDN distribution operations (CloudFront REST-XML API).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::client::AwsClient;
use crate::error::AwsError;
use crate::types::DistributionInfo;
use crate::xml::xml_text;

const API: &str = "/2020-05-31";
const SERVICE: &str = "cloudfront";

/// CloudFront is a global service signed against us-east-1.
const GLOBAL_REGION: &str = "us-east-1";

/// Distribution config for an ALB custom origin. Viewer traffic is forced to
/// HTTPS, the origin connection is https-only, and the default TTLs are zero
/// so every request passes through to the origin.
#[derive(Debug, Clone)]
pub struct DistributionSpec {
    pub alb_dns_name: String,
    pub caller_reference: String,
    pub comment: String,
    pub price_class: String,
    pub certificate_arn: Option<String>,
}

pub struct CloudFrontService {
    client: Arc<AwsClient>,
}

impl CloudFrontService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    pub async fn create_distribution(
        &self,
        spec: &DistributionSpec,
    ) -> Result<DistributionInfo, AwsError> {
        info!(origin = %spec.alb_dns_name, "creating distribution");
        let body = render_distribution_config(spec);
        let base = self.client.base().cloudfront.clone();
        let xml = self
            .client
            .rest_xml(
                "POST",
                &base,
                SERVICE,
                GLOBAL_REGION,
                &format!("{API}/distribution"),
                Some(&body),
            )
            .await?;
        let distribution_id =
            xml_text(&xml, "Id").ok_or_else(|| AwsError::missing_field(SERVICE, "Id"))?;
        let domain_name = xml_text(&xml, "DomainName")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "DomainName"))?;
        let status = xml_text(&xml, "Status").unwrap_or_else(|| "InProgress".into());
        Ok(DistributionInfo {
            distribution_id,
            domain_name,
            status,
        })
    }

    pub async fn get_distribution(&self, distribution_id: &str) -> Result<DistributionInfo, AwsError> {
        let base = self.client.base().cloudfront.clone();
        let xml = self
            .client
            .rest_xml(
                "GET",
                &base,
                SERVICE,
                GLOBAL_REGION,
                &format!("{API}/distribution/{distribution_id}"),
                None,
            )
            .await?;
        Ok(DistributionInfo {
            distribution_id: distribution_id.to_string(),
            domain_name: xml_text(&xml, "DomainName").unwrap_or_default(),
            status: xml_text(&xml, "Status").unwrap_or_else(|| "Unknown".into()),
        })
    }

    /// Long-poll until the distribution reports `Deployed`. Defaults match the
    /// provider's propagation time: 80 polls at 30 s is 40 minutes.
    pub async fn wait_for_deployed(
        &self,
        distribution_id: &str,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<(), AwsError> {
        for attempt in 1..=max_attempts {
            let info = self.get_distribution(distribution_id).await?;
            if info.status == "Deployed" {
                return Ok(());
            }
            debug!(distribution_id, status = %info.status, attempt, "waiting for distribution");
            tokio::time::sleep(delay).await;
        }
        Err(AwsError::WaitTimeout {
            resource: distribution_id.to_string(),
            target: "Deployed",
            attempts: max_attempts,
        })
    }
}

fn render_distribution_config(spec: &DistributionSpec) -> String {
    let viewer_certificate = match &spec.certificate_arn {
        Some(arn) => format!(
            "<ViewerCertificate><ACMCertificateArn>{arn}</ACMCertificateArn><SSLSupportMethod>sni-only</SSLSupportMethod><MinimumProtocolVersion>TLSv1.2_2021</MinimumProtocolVersion></ViewerCertificate>"
        ),
        None => "<ViewerCertificate><CloudFrontDefaultCertificate>true</CloudFrontDefaultCertificate></ViewerCertificate>".to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<DistributionConfig xmlns="http://cloudfront.amazonaws.com/doc/2020-05-31/">
  <CallerReference>{caller_reference}</CallerReference>
  <Comment>{comment}</Comment>
  <Enabled>true</Enabled>
  <PriceClass>{price_class}</PriceClass>
  <HttpVersion>http2and3</HttpVersion>
  <Origins>
    <Quantity>1</Quantity>
    <Items>
      <Origin>
        <Id>alb-origin</Id>
        <DomainName>{origin}</DomainName>
        <CustomOriginConfig>
          <HTTPPort>80</HTTPPort>
          <HTTPSPort>443</HTTPSPort>
          <OriginProtocolPolicy>https-only</OriginProtocolPolicy>
        </CustomOriginConfig>
      </Origin>
    </Items>
  </Origins>
  <DefaultCacheBehavior>
    <TargetOriginId>alb-origin</TargetOriginId>
    <ViewerProtocolPolicy>redirect-to-https</ViewerProtocolPolicy>
    <Compress>true</Compress>
    <MinTTL>0</MinTTL>
    <DefaultTTL>0</DefaultTTL>
    <MaxTTL>0</MaxTTL>
    <ForwardedValues>
      <QueryString>true</QueryString>
      <Cookies><Forward>all</Forward></Cookies>
    </ForwardedValues>
    <AllowedMethods>
      <Quantity>7</Quantity>
      <Items>
        <Method>GET</Method><Method>HEAD</Method><Method>OPTIONS</Method>
        <Method>PUT</Method><Method>POST</Method><Method>PATCH</Method><Method>DELETE</Method>
      </Items>
    </AllowedMethods>
  </DefaultCacheBehavior>
  {viewer_certificate}
</DistributionConfig>"#,
        caller_reference = spec.caller_reference,
        comment = spec.comment,
        price_class = spec.price_class,
        origin = spec.alb_dns_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BaseUrls;
    use crate::creds::{AwsCredentials, StaticCredentialsProvider};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(url: &str) -> CloudFrontService {
        CloudFrontService::new(Arc::new(AwsClient::with_base_urls(
            "us-east-1",
            reqwest::Client::new(),
            Arc::new(StaticCredentialsProvider(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })),
            BaseUrls::single(url),
        )))
    }

    fn spec() -> DistributionSpec {
        DistributionSpec {
            alb_dns_name: "demo-alb-1.us-east-1.elb.amazonaws.com".into(),
            caller_reference: "demo-1".into(),
            comment: "CDN for demo".into(),
            price_class: "PriceClass_100".into(),
            certificate_arn: None,
        }
    }

    #[tokio::test]
    async fn create_distribution_sends_passthrough_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2020-05-31/distribution"))
            .and(body_string_contains("<OriginProtocolPolicy>https-only</OriginProtocolPolicy>"))
            .and(body_string_contains("<ViewerProtocolPolicy>redirect-to-https</ViewerProtocolPolicy>"))
            .and(body_string_contains("<DefaultTTL>0</DefaultTTL>"))
            .and(body_string_contains("<HttpVersion>http2and3</HttpVersion>"))
            .respond_with(ResponseTemplate::new(201).set_body_string(
                "<Distribution><Id>E123</Id><Status>InProgress</Status><DomainName>d111.cloudfront.net</DomainName></Distribution>",
            ))
            .mount(&server)
            .await;

        let info = service(&server.uri()).create_distribution(&spec()).await.unwrap();
        assert_eq!(info.distribution_id, "E123");
        assert_eq!(info.domain_name, "d111.cloudfront.net");
    }

    #[tokio::test]
    async fn wait_for_deployed_reads_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2020-05-31/distribution/E123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<Distribution><Id>E123</Id><Status>Deployed</Status><DomainName>d111.cloudfront.net</DomainName></Distribution>",
            ))
            .mount(&server)
            .await;

        service(&server.uri())
            .wait_for_deployed("E123", 2, Duration::from_millis(1))
            .await
            .unwrap();
    }
}
