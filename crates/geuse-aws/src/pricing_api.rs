//! Pricing catalogue queries (GetProducts).

use std::sync::Arc;

use serde_json::{json, Value};

use crate::client::AwsClient;
use crate::error::AwsError;

const SERVICE: &str = "pricing";
const TARGET: &str = "AWSPriceListService.GetProducts";

/// The pricing endpoint lives in us-east-1 regardless of the resource region.
const PRICING_REGION: &str = "us-east-1";

pub struct PricingApi {
    client: Arc<AwsClient>,
}

impl PricingApi {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    /// TERM_MATCH product query. Each returned entry is the parsed JSON of one
    /// price-list document.
    pub async fn get_products(
        &self,
        service_code: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Value>, AwsError> {
        let filter_values: Vec<Value> = filters
            .iter()
            .map(|(field, value)| {
                json!({ "Type": "TERM_MATCH", "Field": field, "Value": value })
            })
            .collect();
        let base = self.client.base().pricing.clone();
        let resp = self
            .client
            .json_api(
                &base,
                SERVICE,
                PRICING_REGION,
                TARGET,
                &json!({
                    "ServiceCode": service_code,
                    "Filters": filter_values,
                    "FormatVersion": "aws_v1",
                    "MaxResults": 10,
                }),
            )
            .await?;

        let empty = vec![];
        Ok(resp["PriceList"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .filter_map(|entry| match entry {
                Value::String(s) => serde_json::from_str(s).ok(),
                other => Some(other.clone()),
            })
            .collect())
    }
}
