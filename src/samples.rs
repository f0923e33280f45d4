//! The two sample orchestrations and their activities.
//!
//! - `Chain`: capitalizes a list of city names one activity at a time
//! - `FanOutFanIn`: computes `base^e` for every exponent in parallel and sums

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, Json};
use crate::runtime::{ActivityRegistry, OrchestrationRegistry};
use crate::{durable_error, durable_info, durable_warn, Error, JoinPolicy, OrchestrationContext};

pub const CHAIN: &str = "Chain";
pub const FAN_OUT_FAN_IN: &str = "FanOutFanIn";
/// Trigger alias accepted for `FanOutFanIn`.
pub const FAN_OUT_FAN_IN_ALIAS: &str = "FOFI";

pub const CAPITALIZE: &str = "Capitalize";
pub const CALCULATION: &str = "Calculation";

pub const DEFAULT_CITIES: [&str; 4] = ["Tokyo", "London", "Seattle", "Austin"];

/// Closed set of orchestrations this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleOrchestration {
    #[default]
    Chain,
    FanOutFanIn,
}

impl SampleOrchestration {
    pub fn name(self) -> &'static str {
        match self {
            SampleOrchestration::Chain => CHAIN,
            SampleOrchestration::FanOutFanIn => FAN_OUT_FAN_IN,
        }
    }

    /// Resolve the trigger's requested type. Missing or unknown types run
    /// the chain.
    pub fn from_trigger(trigger: Option<&str>) -> Self {
        trigger.and_then(|t| t.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for SampleOrchestration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleOrchestration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CHAIN => Ok(SampleOrchestration::Chain),
            FAN_OUT_FAN_IN | FAN_OUT_FAN_IN_ALIAS => Ok(SampleOrchestration::FanOutFanIn),
            other => Err(Error::UnknownOrchestrator { name: other.to_string() }),
        }
    }
}

pub fn capitalize(input: &str) -> String {
    input.to_uppercase()
}

/// `base^exponent`, saturating at the `i32` bounds.
pub fn calculation(base: i32, exponent: i32) -> Result<i32, String> {
    let exp = u32::try_from(exponent).map_err(|_| format!("negative exponent {exponent} is not supported"))?;
    Ok(base.saturating_pow(exp))
}

/// Input of the fan-out/fan-in sample. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutInput {
    pub base: i32,
    pub exponents: Vec<i32>,
    pub failure_policy: JoinPolicy,
}

impl Default for FanOutInput {
    fn default() -> Self {
        Self {
            base: 3,
            exponents: vec![4, 3, 2, 1],
            failure_policy: JoinPolicy::FailFast,
        }
    }
}

fn parse_or_default<T: serde::de::DeserializeOwned + Default>(input: &str) -> Result<T, Error> {
    if input.trim().is_empty() {
        return Ok(T::default());
    }
    Json::decode(input).map_err(|e| Error::application(format!("invalid input: {e}")))
}

#[derive(Deserialize)]
#[serde(transparent)]
struct Cities(Vec<String>);

impl Default for Cities {
    fn default() -> Self {
        Cities(DEFAULT_CITIES.iter().map(|c| c.to_string()).collect())
    }
}

/// Capitalize each city in turn; every call waits for the previous one.
pub async fn chain(ctx: OrchestrationContext, input: String) -> Result<String, Error> {
    let Cities(cities) = parse_or_default(&input)?;
    durable_info!(ctx, orchestration = CHAIN, count = cities.len(), "chain started");

    let mut outputs = Vec::with_capacity(cities.len());
    for city in &cities {
        match ctx.schedule_activity(CAPITALIZE, city.as_str()).await {
            Ok(out) => outputs.push(out),
            Err(e) => {
                durable_error!(ctx, orchestration = CHAIN, city = %city, error = %e, "chain step failed");
                return Err(e);
            }
        }
    }

    let joined = outputs.join(", ");
    durable_info!(ctx, orchestration = CHAIN, result = %joined, "chain finished");
    Ok(joined)
}

/// Schedule one `Calculation` per exponent in a single pass, then sum.
pub async fn fan_out_fan_in(ctx: OrchestrationContext, input: String) -> Result<String, Error> {
    let params: FanOutInput = parse_or_default(&input)?;
    durable_info!(
        ctx,
        orchestration = FAN_OUT_FAN_IN,
        base = params.base,
        branches = params.exponents.len(),
        "fan-out started"
    );

    let tasks = params
        .exponents
        .iter()
        .map(|exp| ctx.schedule_activity_typed(CALCULATION, &[params.base, *exp]))
        .collect();

    let results = match ctx.fan_in(tasks, params.failure_policy).await {
        Ok(r) => r,
        Err(e) => {
            durable_warn!(ctx, orchestration = FAN_OUT_FAN_IN, error = %e, "fan-out branch failed");
            return Err(e);
        }
    };

    let mut sum: i64 = 0;
    for raw in &results {
        let value: i32 = Json::decode(raw)?;
        sum += i64::from(value);
    }
    durable_info!(ctx, orchestration = FAN_OUT_FAN_IN, sum, "fan-in finished");
    Ok(sum.to_string())
}

pub fn activity_registry() -> Arc<ActivityRegistry> {
    Arc::new(
        ActivityRegistry::builder()
            .register(CAPITALIZE, |input: String| async move { Ok(capitalize(&input)) })
            .register_typed(CALCULATION, |[base, exponent]: [i32; 2]| async move {
                calculation(base, exponent)
            })
            .build(),
    )
}

pub fn orchestration_registry() -> OrchestrationRegistry {
    OrchestrationRegistry::builder()
        .register(CHAIN, chain)
        .register(FAN_OUT_FAN_IN, fan_out_fan_in)
        .build()
}
