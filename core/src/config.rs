use crate::{
    arm::{default_catalog, Arm},
    error::{BanditError, BanditResult},
};
use serde::{Deserialize, Serialize};

// ── Learning parameters ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BanditParams {
    /// Initial exploration rate.
    pub epsilon:             f64,
    /// Learning rate of the running-average update.
    pub alpha:               f64,
    /// Exploration never decays below this.
    pub epsilon_floor:       f64,
    /// Multiplier used by scheduled decay.
    pub decay_rate:          f64,
    /// Decay epsilon after every n-th applied update. None = caller-driven only.
    pub decay_every:         Option<u64>,
    /// Base reward for a declined offer.
    pub declined_reward:     f64,
    /// Penalty per unit of cost fraction, applied to every response.
    pub cost_penalty_weight: f64,
    /// Rewards are clamped into [-reward_bound, reward_bound].
    pub reward_bound:        f64,
}

impl Default for BanditParams {
    fn default() -> Self {
        Self {
            epsilon:             0.1,
            alpha:               0.1,
            epsilon_floor:       0.01,
            decay_rate:          0.99,
            decay_every:         None,
            declined_reward:     -0.1,
            cost_penalty_weight: 0.1,
            reward_bound:        1.0,
        }
    }
}

impl BanditParams {
    pub fn validate(&self) -> BanditResult<()> {
        let check = |name: &'static str, value: f64, ok: bool| {
            if ok && value.is_finite() {
                Ok(())
            } else {
                Err(BanditError::InvalidParameter { name, value })
            }
        };
        check("epsilon", self.epsilon, (0.0..=1.0).contains(&self.epsilon))?;
        check("epsilon_floor", self.epsilon_floor, (0.0..=1.0).contains(&self.epsilon_floor))?;
        check("alpha", self.alpha, self.alpha > 0.0 && self.alpha <= 1.0)?;
        check("decay_rate", self.decay_rate, self.decay_rate > 0.0 && self.decay_rate <= 1.0)?;
        check("declined_reward", self.declined_reward, self.declined_reward <= 0.0)?;
        check("cost_penalty_weight", self.cost_penalty_weight, self.cost_penalty_weight >= 0.0)?;
        check("reward_bound", self.reward_bound, self.reward_bound > 0.0)?;
        if self.decay_every == Some(0) {
            return Err(BanditError::InvalidParameter { name: "decay_every", value: 0.0 });
        }
        Ok(())
    }
}

// ── Engine configuration ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct ArmCatalogFile {
    arms: Vec<Arm>,
}

#[derive(Debug, Clone, Deserialize)]
struct BanditParamsFile {
    #[serde(default)]
    master_seed: u64,
    #[serde(default)]
    params:      BanditParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub master_seed: u64,
    pub params:      BanditParams,
    pub arms:        Vec<Arm>,
}

impl RetentionConfig {
    /// Load from the data/ directory.
    /// In tests, use RetentionConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let arm_path = format!("{data_dir}/arms/arm_catalog.json");
        let arm_content = std::fs::read_to_string(&arm_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {arm_path}: {e}"))?;
        let arm_file: ArmCatalogFile = serde_json::from_str(&arm_content)?;

        let params_path = format!("{data_dir}/bandit/bandit_params.json");
        let params_content = std::fs::read_to_string(&params_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {params_path}: {e}"))?;
        let params_file: BanditParamsFile = serde_json::from_str(&params_content)?;

        params_file.params.validate()?;

        log::info!(
            "config: loaded {} arms from {arm_path} (epsilon={}, alpha={})",
            arm_file.arms.len(),
            params_file.params.epsilon,
            params_file.params.alpha,
        );

        Ok(Self {
            master_seed: params_file.master_seed,
            params:      params_file.params,
            arms:        arm_file.arms,
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            master_seed: 42,
            params:      BanditParams::default(),
            arms:        default_catalog(),
        }
    }

    pub fn with_seed(mut self, master_seed: u64) -> Self {
        self.master_seed = master_seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(BanditParams::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_epsilon_rejected() {
        let params = BanditParams { epsilon: 1.5, ..Default::default() };
        assert!(matches!(
            params.validate(),
            Err(BanditError::InvalidParameter { name: "epsilon", .. })
        ));
    }

    #[test]
    fn zero_alpha_rejected() {
        let params = BanditParams { alpha: 0.0, ..Default::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn zero_decay_interval_rejected() {
        let params = BanditParams { decay_every: Some(0), ..Default::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn partial_params_file_uses_defaults() {
        let file: BanditParamsFile =
            serde_json::from_str(r#"{ "master_seed": 9, "params": { "epsilon": 0.2 } }"#).unwrap();
        assert_eq!(file.master_seed, 9);
        assert_eq!(file.params.epsilon, 0.2);
        assert_eq!(file.params.alpha, 0.1);
    }

    #[test]
    fn load_reads_shipped_data_dir() {
        let data_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");
        let config = RetentionConfig::load(data_dir).unwrap();
        assert_eq!(config.arms, default_catalog());
        assert_eq!(config.params, BanditParams::default());
    }

    #[test]
    fn load_reports_missing_path() {
        let err = RetentionConfig::load("/nonexistent/retention").unwrap_err();
        assert!(err.to_string().contains("arm_catalog.json"));
    }
}
