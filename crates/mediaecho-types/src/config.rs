use serde::{Deserialize, Serialize};

use crate::chunk::PayloadType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    Constant,
    #[default]
    Variable,
    Quantizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMode {
    Quality,
    #[default]
    Realtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    #[default]
    NoPreference,
    PreferHardware,
    PreferSoftware,
}

/// Temporal scalability mode. Only a single spatial layer is modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScalabilityMode {
    #[default]
    L1T1,
    L1T2,
    L1T3,
}

impl ScalabilityMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "L1T1" => Some(Self::L1T1),
            "L1T2" => Some(Self::L1T2),
            "L1T3" => Some(Self::L1T3),
            _ => None,
        }
    }

    /// Temporal layer id of the `index`-th frame after a keyframe.
    pub fn temporal_layer_for(self, index: u64) -> u8 {
        match self {
            Self::L1T1 => 0,
            Self::L1T2 => (index % 2) as u8,
            Self::L1T3 => [0, 2, 1, 2][(index % 4) as usize],
        }
    }
}

/// Parameters handed to the encode capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    #[serde(default)]
    pub bitrate_mode: BitrateMode,
    #[serde(default)]
    pub latency_mode: LatencyMode,
    pub framerate: f64,
    #[serde(default)]
    pub hardware_acceleration: HardwareAcceleration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<ScalabilityMode>,
    /// A keyframe is forced every `key_interval` frames.
    pub key_interval: u32,
    #[serde(rename = "pt")]
    pub payload_type: PayloadType,
    pub ssrc: u32,
}

impl EncoderConfig {
    /// Build a config for `codec`, deriving the payload type from the codec string.
    pub fn new(codec: &str, width: u32, height: u32, ssrc: u32) -> Option<Self> {
        let payload_type = PayloadType::for_codec(codec)?;
        Some(Self {
            codec: codec.to_string(),
            width,
            height,
            bitrate: 1_000_000,
            bitrate_mode: BitrateMode::default(),
            latency_mode: LatencyMode::default(),
            framerate: 30.0,
            hardware_acceleration: HardwareAcceleration::default(),
            scalability_mode: None,
            key_interval: 3000,
            payload_type,
            ssrc,
        })
    }

    pub fn scalability(&self) -> ScalabilityMode {
        self.scalability_mode.unwrap_or_default()
    }
}

/// Decoder parameters carried as JSON inside configuration chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderConfig {
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coded_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coded_height: Option<u32>,
    #[serde(default)]
    pub hardware_acceleration: HardwareAcceleration,
    /// Codec-specific out-of-band data (e.g. avcC), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Vec<u8>>,
}

/// Result of a capability check: whether the config is usable, and the
/// config as the capability understood it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Support<C> {
    pub supported: bool,
    pub config: C,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_config_json_carries_wire_payload_type() {
        let cfg = EncoderConfig::new("vp8", 640, 480, 0xdead_beef).unwrap();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["pt"], 3);
        assert_eq!(json["keyInterval"], 3000);
        assert!(json.get("scalabilityMode").is_none());

        let back: EncoderConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back.payload_type, PayloadType::Vp8);

        let mut bad = json;
        bad["pt"] = serde_json::json!(9);
        assert!(serde_json::from_value::<EncoderConfig>(bad).is_err());
    }

    #[test]
    fn decoder_config_round_trips_through_json() {
        let cfg = DecoderConfig {
            codec: "vp09.00.10.08".into(),
            coded_width: Some(1280),
            coded_height: Some(720),
            hardware_acceleration: HardwareAcceleration::PreferSoftware,
            description: None,
        };
        let text = serde_json::to_string(&cfg).unwrap();
        assert!(text.contains("codedWidth"));
        let back: DecoderConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn temporal_layer_patterns() {
        let l1t3: Vec<u8> = (0..8).map(|i| ScalabilityMode::L1T3.temporal_layer_for(i)).collect();
        assert_eq!(l1t3, vec![0, 2, 1, 2, 0, 2, 1, 2]);
        let l1t2: Vec<u8> = (0..4).map(|i| ScalabilityMode::L1T2.temporal_layer_for(i)).collect();
        assert_eq!(l1t2, vec![0, 1, 0, 1]);
        assert_eq!(ScalabilityMode::parse("l1t2"), Some(ScalabilityMode::L1T2));
        assert_eq!(ScalabilityMode::parse("L2T2"), None);
    }
}
