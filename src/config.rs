use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;

/// Mirrors `qd_router_mode_t`: whether this node sits at the edge of the
/// network, inside the interior mesh, or stands alone (no inter-router
/// links at all). Only `Interior` registers the well-known `qdrouter`/
/// `qdhello` addresses on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouterMode {
    Standalone,
    Interior,
    Edge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub area: String,
    pub router_id: String,
    pub mode: RouterMode,
    pub mask_table_width: usize,
    pub initial_credit: u32,
    #[serde(with = "duration_secs")]
    pub timer_tick: Duration,
}

impl RouterConfig {
    pub fn new<A: Into<String>, R: Into<String>>(area: A, router_id: R, mode: RouterMode) -> Self {
        Self { area: area.into(), router_id: router_id.into(), mode, ..Self::default() }
    }

    pub fn set_mask_table_width(&mut self, width: usize) {
        self.mask_table_width = width;
    }

    pub fn set_initial_credit(&mut self, credit: u32) {
        self.initial_credit = credit;
    }

    pub fn set_timer_tick(&mut self, tick: Duration) {
        self.timer_tick = tick;
    }

    pub fn from_toml_str(text: &str) -> Result<Self, RouterError> {
        let config: RouterConfig = toml::from_str(text)?;
        if config.area.is_empty() || config.router_id.is_empty() {
            return Err(RouterError::InvalidConfig("area and router_id must be non-empty".into()));
        }
        Ok(config)
    }

    /// Router-id form used in trace lists and the `ingress` annotation:
    /// `<area>/<id>`.
    pub fn router_id_tag(&self) -> String {
        format!("{}/{}", self.area, self.router_id)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            area: "area".into(),
            router_id: "r1".into(),
            mode: RouterMode::Interior,
            mask_table_width: 256,
            initial_credit: 1000,
            timer_tick: Duration::from_secs(1),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
