//! # Configuration loader
//!
//! Parses the `NAME=VALUE` simulation config file (§6) into a
//! [`SimConfig`], then hands out one [`crate::node::NodeInfo`] per node by
//! combining the shared parameters with a node's own ID and owned
//! prefixes. Unlike the original's process-wide static registry (§9
//! Design Notes), this is a plain value loaded once and passed by
//! reference into whatever constructs each node's [`crate::node::Strategy`].

use crate::node::NodeInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("config field {field} has invalid value {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Every shared simulation parameter (§6), with the original's defaults.
/// PHY, topology, noise-injection and energy fields round-trip through the
/// parser so a full config file still loads, even though only the fields
/// `rntp-core` actually consumes affect its behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub log_dir: String,

    pub standard: String,
    pub data_mode: String,
    pub tx_power_start_in_dbm: f64,
    pub tx_power_end_in_dbm: f64,
    pub rx_gain_in_dbm: f64,

    pub n_nodes: u32,
    pub grid_width_in_nodes: u32,
    pub grid_delta_x: f64,
    pub grid_delta_y: f64,
    pub consumer_node_id: u32,
    pub producer_node_id: u32,

    pub noise: bool,
    pub node_ids_under_noises: Vec<u32>,
    pub noise_start_sec: f64,
    pub noise_stop_sec: f64,
    pub noise_mean: f64,
    pub noise_var: f64,

    pub sim_time_in_secs: f64,
    pub extension_time_in_secs: f64,

    pub capsule_per_hop_timeout: f64,
    pub capsule_retrying_times: u32,
    pub congestion_control_threshold: u32,
    pub congestion_control_init_win: u32,

    pub interest_send_times: u32,
    pub interest_contention_time_in_secs: f64,

    pub echo_period_in_secs: f64,
    pub msg_timeout_in_secs: f64,
    pub quality_alpha: f64,

    pub throughput_queue_size_in_secs: u32,
    pub piat_estimation_confident_ratio: f64,

    pub consumer_max_wait_time_in_secs: f64,
    pub consumer_need_to_terminate_transport: bool,
    pub consumer_terminate_transport_delay_in_secs: f64,

    pub producer_freq: u32,

    pub enegery_battery_capacity_in_mah: f64,
    pub enegery_battery_voltage_in_v: f64,
    pub trace_battery: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_dir: "/tmp/".to_string(),
            standard: "802.11a".to_string(),
            data_mode: "OfdmRate54Mbps".to_string(),
            tx_power_start_in_dbm: 20.0,
            tx_power_end_in_dbm: 20.0,
            rx_gain_in_dbm: 0.0,
            n_nodes: 64,
            grid_width_in_nodes: 8,
            grid_delta_x: 10.0,
            grid_delta_y: 10.0,
            consumer_node_id: 0,
            producer_node_id: 63,
            noise: true,
            node_ids_under_noises: vec![4, 7, 9],
            noise_start_sec: 5.0,
            noise_stop_sec: 15.0,
            noise_mean: 10.0,
            noise_var: 5.0,
            sim_time_in_secs: 20.0,
            extension_time_in_secs: 10.0,
            capsule_per_hop_timeout: 1.0,
            capsule_retrying_times: 3,
            congestion_control_threshold: 16,
            congestion_control_init_win: 1,
            throughput_queue_size_in_secs: 2,
            piat_estimation_confident_ratio: 0.9999,
            interest_send_times: 3,
            echo_period_in_secs: 1.0,
            msg_timeout_in_secs: 3.5,
            interest_contention_time_in_secs: 0.005,
            consumer_max_wait_time_in_secs: 5.0,
            quality_alpha: 1.0 / 8.0,
            producer_freq: 10,
            consumer_need_to_terminate_transport: false,
            consumer_terminate_transport_delay_in_secs: 100.0,
            enegery_battery_capacity_in_mah: 3000.0,
            enegery_battery_voltage_in_v: 1.5,
            trace_battery: false,
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::parse(&text)
    }

    /// Parses `NAME=VALUE` lines (blank lines and anything without an `=`
    /// are silently skipped, matching the original's regex which only
    /// matches well-formed assignment lines).
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut fields: HashMap<String, String> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                fields.insert(name.trim().to_string(), value.trim().to_string());
            }
        }

        let mut cfg = SimConfig::default();
        for (name, value) in &fields {
            match name.as_str() {
                "LOG_DIR" => cfg.log_dir = value.clone(),
                "STANDARD" => cfg.standard = value.clone(),
                "DATA_MODE" => cfg.data_mode = value.clone(),
                "TX_POWER_START_IN_DBM" => cfg.tx_power_start_in_dbm = parse_f64("TX_POWER_START_IN_DBM", value)?,
                "TX_POWER_END_IN_DBM" => cfg.tx_power_end_in_dbm = parse_f64("TX_POWER_END_IN_DBM", value)?,
                "RX_GAIN_IN_DBM" => cfg.rx_gain_in_dbm = parse_f64("RX_GAIN_IN_DBM", value)?,
                "N_NODES" => cfg.n_nodes = parse_u32("N_NODES", value)?,
                "GRID_WIDTH_IN_NODES" => cfg.grid_width_in_nodes = parse_u32("GRID_WIDTH_IN_NODES", value)?,
                "GRID_DELTA_X" => cfg.grid_delta_x = parse_f64("GRID_DELTA_X", value)?,
                "GRID_DELTA_Y" => cfg.grid_delta_y = parse_f64("GRID_DELTA_Y", value)?,
                "CONSUMER_NODE_ID" => cfg.consumer_node_id = parse_u32("CONSUMER_NODE_ID", value)?,
                "PRODUCER_NODE_ID" => cfg.producer_node_id = parse_u32("PRODUCER_NODE_ID", value)?,
                "NOISE" => cfg.noise = value == "true",
                "NODE_IDS_UNDER_NOISES" => cfg.node_ids_under_noises = parse_u32_csv("NODE_IDS_UNDER_NOISES", value)?,
                "NOISE_START_SEC" => cfg.noise_start_sec = parse_f64("NOISE_START_SEC", value)?,
                "NOISE_STOP_SEC" => cfg.noise_stop_sec = parse_f64("NOISE_STOP_SEC", value)?,
                "NOISE_MEAN" => cfg.noise_mean = parse_f64("NOISE_MEAN", value)?,
                "NOISE_VAR" => cfg.noise_var = parse_f64("NOISE_VAR", value)?,
                "SIM_TIME_IN_SECS" => cfg.sim_time_in_secs = parse_f64("SIM_TIME_IN_SECS", value)?,
                "EXTENSION_TIME_IN_SECS" => cfg.extension_time_in_secs = parse_f64("EXTENSION_TIME_IN_SECS", value)?,
                "CAPSULE_PER_HOP_TIMEOUT" => cfg.capsule_per_hop_timeout = parse_f64("CAPSULE_PER_HOP_TIMEOUT", value)?,
                "CAPSULE_RETRYING_TIMES" => cfg.capsule_retrying_times = parse_u32("CAPSULE_RETRYING_TIMES", value)?,
                "CONGESTION_CONTROL_THRESHOLD" => cfg.congestion_control_threshold = parse_u32("CONGESTION_CONTROL_THRESHOLD", value)?,
                "CONGESTION_CONTROL_INIT_WIN" => cfg.congestion_control_init_win = parse_u32("CONGESTION_CONTROL_INIT_WIN", value)?,
                "INTEREST_SEND_TIMES" => cfg.interest_send_times = parse_u32("INTEREST_SEND_TIMES", value)?,
                "INTEREST_CONTENTION_TIME_IN_SECS" => cfg.interest_contention_time_in_secs = parse_f64("INTEREST_CONTENTION_TIME_IN_SECS", value)?,
                "ECHO_PERIOD_IN_SECS" => cfg.echo_period_in_secs = parse_f64("ECHO_PERIOD_IN_SECS", value)?,
                "MSG_TIMEOUT_IN_SECS" => cfg.msg_timeout_in_secs = parse_f64("MSG_TIMEOUT_IN_SECS", value)?,
                "QUALITY_ALPHA" => cfg.quality_alpha = parse_f64("QUALITY_ALPHA", value)?,
                "THROUGHPUT_QUEUE_SIZE_IN_SECS" => cfg.throughput_queue_size_in_secs = parse_u32("THROUGHPUT_QUEUE_SIZE_IN_SECS", value)?,
                "PIAT_ESTIMATION_CONFIDENT_RATIO" => cfg.piat_estimation_confident_ratio = parse_f64("PIAT_ESTIMATION_CONFIDENT_RATIO", value)?,
                "CONSUMER_MAX_WAIT_TIME_IN_SECS" => cfg.consumer_max_wait_time_in_secs = parse_f64("CONSUMER_MAX_WAIT_TIME_IN_SECS", value)?,
                "CONSUMER_NEED_TO_TERMINATE_TRANSPORT" => cfg.consumer_need_to_terminate_transport = value == "true",
                "CONSUMER_TERMINATE_TRANSPORT_DELAY_IN_SECS" => {
                    cfg.consumer_terminate_transport_delay_in_secs = parse_f64("CONSUMER_TERMINATE_TRANSPORT_DELAY_IN_SECS", value)?
                }
                "PRODUCER_FREQ" => cfg.producer_freq = parse_u32("PRODUCER_FREQ", value)?,
                "ENEGERY_BATTERY_CAPACITY_IN_MAH" => cfg.enegery_battery_capacity_in_mah = parse_f64("ENEGERY_BATTERY_CAPACITY_IN_MAH", value)?,
                "ENEGERY_BATTERY_VOLTAGE_IN_V" => cfg.enegery_battery_voltage_in_v = parse_f64("ENEGERY_BATTERY_VOLTAGE_IN_V", value)?,
                "TRACE_BATTERY" => cfg.trace_battery = value == "true",
                _ => {} // unrecognized keys are ignored, same as the original's if/else chain
            }
        }
        Ok(cfg)
    }

    /// Builds one node's [`NodeInfo`] by combining the shared config with
    /// the per-node fields the original tracked outside `RntpConfig`
    /// entirely (a node's own ID and the prefixes it produces for).
    pub fn node_info(&self, node_id: u32, prefixes: Vec<String>) -> NodeInfo {
        NodeInfo {
            node_id,
            prefixes,
            log_dir: self.log_dir.clone(),
            standard: self.standard.clone(),
            data_mode: self.data_mode.clone(),
            tx_power_start_in_dbm: self.tx_power_start_in_dbm,
            tx_power_end_in_dbm: self.tx_power_end_in_dbm,
            rx_gain_in_dbm: self.rx_gain_in_dbm,
            n_nodes: self.n_nodes,
            grid_width_in_nodes: self.grid_width_in_nodes,
            grid_delta_x: self.grid_delta_x,
            grid_delta_y: self.grid_delta_y,
            consumer_node_id: self.consumer_node_id,
            producer_node_id: self.producer_node_id,
            noise: self.noise,
            node_ids_under_noises: self.node_ids_under_noises.clone(),
            noise_start_sec: self.noise_start_sec,
            noise_stop_sec: self.noise_stop_sec,
            noise_mean: self.noise_mean,
            noise_var: self.noise_var,
            sim_time_in_secs: self.sim_time_in_secs,
            extension_time_in_secs: self.extension_time_in_secs,
            capsule_per_hop_timeout: self.capsule_per_hop_timeout,
            capsule_retrying_times: self.capsule_retrying_times,
            congestion_control_threshold: self.congestion_control_threshold,
            congestion_control_init_win: self.congestion_control_init_win,
            interest_send_times: self.interest_send_times,
            interest_contention_time_in_secs: self.interest_contention_time_in_secs,
            echo_period_in_secs: self.echo_period_in_secs,
            msg_timeout_in_secs: self.msg_timeout_in_secs,
            quality_alpha: self.quality_alpha,
            throughput_queue_size_in_secs: self.throughput_queue_size_in_secs,
            piat_estimation_confident_ratio: self.piat_estimation_confident_ratio,
            consumer_max_wait_time_in_secs: self.consumer_max_wait_time_in_secs,
            consumer_need_to_terminate_transport: self.consumer_need_to_terminate_transport,
            consumer_terminate_transport_delay_in_secs: self.consumer_terminate_transport_delay_in_secs,
            producer_freq: self.producer_freq,
            enegery_battery_capacity_in_mah: self.enegery_battery_capacity_in_mah,
            enegery_battery_voltage_in_v: self.enegery_battery_voltage_in_v,
            trace_battery: self.trace_battery,
        }
    }
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidField { field, value: value.to_string() })
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidField { field, value: value.to_string() })
}

fn parse_u32_csv(field: &'static str, value: &str) -> Result<Vec<u32>, ConfigError> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value.split(',').map(|s| parse_u32(field, s.trim())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_keep_their_default() {
        let cfg = SimConfig::parse("").unwrap();
        assert_eq!(cfg, SimConfig::default());
    }

    #[test]
    fn recognized_fields_override_defaults() {
        let cfg = SimConfig::parse(
            "LOG_DIR=/var/log/rntp/\nN_NODES=12\nNOISE=true\nNODE_IDS_UNDER_NOISES=1,3,5\nQUALITY_ALPHA=0.25\n",
        )
        .unwrap();
        assert_eq!(cfg.log_dir, "/var/log/rntp/");
        assert_eq!(cfg.n_nodes, 12);
        assert!(cfg.noise);
        assert_eq!(cfg.node_ids_under_noises, vec![1, 3, 5]);
        assert_eq!(cfg.quality_alpha, 0.25);
    }

    #[test]
    fn blank_lines_and_unknown_keys_are_ignored() {
        let cfg = SimConfig::parse("\n\nSOME_FUTURE_KEY=123\nPRODUCER_FREQ=7\n").unwrap();
        assert_eq!(cfg.producer_freq, 7);
    }

    #[test]
    fn invalid_numeric_value_is_rejected() {
        let err = SimConfig::parse("N_NODES=not-a-number").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "N_NODES", .. }));
    }

    #[test]
    fn node_info_combines_shared_config_with_per_node_fields() {
        let cfg = SimConfig::default();
        let info = cfg.node_info(5, vec!["/sensors/node5".to_string()]);
        assert_eq!(info.node_id, 5);
        assert_eq!(info.prefixes, vec!["/sensors/node5".to_string()]);
        assert_eq!(info.echo_period_in_secs, cfg.echo_period_in_secs);
    }
}
