use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::likelihood::{ParameterDomain, PoissonForm};
use crate::models::{
    detector::Detector,
    emitter::Emitter,
    property::{
        Distribution, PropertyCatalog, PropertyDescriptor, PropertyError, PropertyType,
        PropertyValue, SharedCatalog,
    },
    sensor::Sensor,
    sensor_module::SensorModule,
    traits::{DeviceKind, SamplingMode},
};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// 放射開始時刻（ns）
    #[serde(default)]
    pub t0_ns: f64,
    pub n_events: usize,
    #[serde(default)]
    pub sampling: SamplingMode,
    #[serde(default)]
    pub dark_noise: bool,
}

/// 検出器の配置（既定カタログの生成に使う）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayoutConfig {
    pub n_module: usize,
    pub module_pitch_mm: f64,
    pub n_sensor: usize,
    pub sensor_pitch_mm: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            n_module: 7,
            module_pitch_mm: 700.0,
            n_sensor: 5,
            sensor_pitch_mm: 115.0,
        }
    }
}

/// YAML 上の平均値（型はプロパティの `type` で解釈する）
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MeanValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// 既定カタログへのプロパティの上書き・追加
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PropertyOverride {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub property_type: String,
    pub distribution: String,
    pub mean: MeanValue,
    #[serde(default)]
    pub sigma: f64,
}

impl PropertyOverride {
    /// 記述子に変換（未知の型・分布名はエラー）
    pub fn to_descriptor(&self) -> Result<PropertyDescriptor, PropertyError> {
        let property_type = PropertyType::from_str(&self.property_type)?;
        let distribution = Distribution::from_str(&self.distribution)?;
        let mean = match (property_type, self.mean) {
            (PropertyType::Float, MeanValue::Float(v)) => PropertyValue::Float(v),
            (PropertyType::Float, MeanValue::Int(v)) => PropertyValue::Float(v as f64),
            (PropertyType::Int, MeanValue::Int(v)) => PropertyValue::Int(v),
            (PropertyType::Bool, MeanValue::Bool(v)) => PropertyValue::Bool(v),
            (expected, found) => {
                return Err(PropertyError::TypeMismatch {
                    name: self.name.clone(),
                    expected,
                    found: match found {
                        MeanValue::Bool(_) => PropertyType::Bool,
                        MeanValue::Int(_) => PropertyType::Int,
                        MeanValue::Float(_) => PropertyType::Float,
                    },
                });
            }
        };
        PropertyDescriptor::new(
            &self.name,
            &self.description,
            property_type,
            distribution,
            mean,
            self.sigma,
        )
    }
}

/// デバイス種別ごとの上書き
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PropertyOverrides {
    pub detector: Vec<PropertyOverride>,
    pub module: Vec<PropertyOverride>,
    pub sensor: Vec<PropertyOverride>,
    pub emitter: Vec<PropertyOverride>,
}

impl PropertyOverrides {
    fn for_kind(&self, kind: DeviceKind) -> &[PropertyOverride] {
        match kind {
            DeviceKind::Detector => &self.detector,
            DeviceKind::Module => &self.module,
            DeviceKind::Sensor => &self.sensor,
            DeviceKind::Emitter => &self.emitter,
        }
    }
}

/// 尤度設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LikelihoodConfig {
    pub poisson_form: PoissonForm,
}

/// フィット設定（外部の最適化器とプロファイル走査に渡す）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FitConfig {
    pub parameters: ParameterDomain,
    /// プロファイル走査の片側ステップ数
    pub profile_steps: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            parameters: ParameterDomain::default(),
            profile_steps: 5,
        }
    }
}

/// シナリオから作られた共有カタログ一式
#[derive(Debug, Clone)]
pub struct Catalogs {
    pub detector: SharedCatalog,
    pub module: SharedCatalog,
    pub sensor: SharedCatalog,
    pub emitter: SharedCatalog,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub properties: PropertyOverrides,
    #[serde(default)]
    pub likelihood: LikelihoodConfig,
    #[serde(default)]
    pub fit: FitConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            meta: ScenarioMeta {
                version: "1.0".to_string(),
                name: "default".to_string(),
                description: "7 modules × 5 sensors, track along +x".to_string(),
            },
            sim: SimulationConfig {
                seed: 42,
                t0_ns: 0.0,
                n_events: 10,
                sampling: SamplingMode::Sampled,
                dark_noise: false,
            },
            layout: LayoutConfig::default(),
            properties: PropertyOverrides::default(),
            likelihood: LikelihoodConfig::default(),
            fit: FitConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::Parse(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// YAML文字列からシナリオ設定を読み込み
    pub fn from_yaml(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の基本的な検証
    ///
    /// プロパティの上書きは [`ScenarioConfig::build_catalogs`] で記述子として検証されます。
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.n_events == 0 {
            return Err(ScenarioError::Validation("n_events must be positive".to_string()));
        }

        let layout = &self.layout;
        if layout.n_module == 0 || layout.n_sensor == 0 {
            return Err(ScenarioError::Validation(
                "n_module and n_sensor must be positive".to_string(),
            ));
        }
        if layout.module_pitch_mm <= 0.0 || layout.sensor_pitch_mm <= 0.0 {
            return Err(ScenarioError::Validation("pitches must be positive".to_string()));
        }

        for spec in self.fit.parameters.specs() {
            if spec.step <= 0.0 {
                return Err(ScenarioError::Validation(format!(
                    "step of {} must be positive",
                    spec.name
                )));
            }
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min >= max {
                    return Err(ScenarioError::Validation(format!(
                        "invalid bounds for {}: [{}, {}]",
                        spec.name, min, max
                    )));
                }
            }
            if !spec.contains(spec.initial) {
                return Err(ScenarioError::Validation(format!(
                    "initial value of {} ({}) outside bounds",
                    spec.name, spec.initial
                )));
            }
        }

        Ok(())
    }

    /// 既定カタログを生成し、シナリオの上書きを適用
    pub fn build_catalogs(&self) -> Result<Catalogs, ScenarioError> {
        let layout = &self.layout;
        let detector = Detector::default_catalog(layout.n_module, layout.module_pitch_mm)?;
        let module = SensorModule::default_catalog(layout.n_sensor, layout.sensor_pitch_mm)?;
        let sensor = Sensor::default_catalog()?;
        let emitter = Emitter::default_catalog()?;

        let detector = self.apply_overrides(detector)?;
        let module = self.apply_overrides(module)?;
        // 配置プロパティ (x_i, y_i, angle_i) は layout の個数分だけ作られる
        check_count(&detector, "n_module", layout.n_module)?;
        check_count(&module, "n_sensor", layout.n_sensor)?;

        Ok(Catalogs {
            detector: detector.into_shared(),
            module: module.into_shared(),
            sensor: self.apply_overrides(sensor)?.into_shared(),
            emitter: self.apply_overrides(emitter)?.into_shared(),
        })
    }

    /// デバイス種別の上書きをカタログに適用
    ///
    /// 1つのリスト内で同じ名前を2回上書きすることはできません（`DuplicateName`）。
    fn apply_overrides(&self, mut catalog: PropertyCatalog) -> Result<PropertyCatalog, ScenarioError> {
        let mut seen = HashSet::new();
        for o in self.properties.for_kind(catalog.kind()) {
            if !seen.insert(o.name.as_str()) {
                return Err(PropertyError::DuplicateName(o.name.clone()).into());
            }
            catalog.replace(o.to_descriptor()?);
        }
        Ok(catalog)
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("シード値: {}", self.sim.seed);
        println!("イベント数: {}", self.sim.n_events);
        println!("放射開始時刻: {:.1}ns", self.sim.t0_ns);
        println!("サンプリング: {:?}", self.sim.sampling);
        println!("ダークノイズ: {}", if self.sim.dark_noise { "有効" } else { "無効" });
        println!();

        println!("=== 検出器 ===");
        println!(
            "モジュール: {}基 (間隔 {:.0}mm)",
            self.layout.n_module, self.layout.module_pitch_mm
        );
        println!(
            "センサー: {}基/モジュール (間隔 {:.0}mm)",
            self.layout.n_sensor, self.layout.sensor_pitch_mm
        );
        let n_overrides = [
            DeviceKind::Detector,
            DeviceKind::Module,
            DeviceKind::Sensor,
            DeviceKind::Emitter,
        ]
        .iter()
        .map(|&k| self.properties.for_kind(k).len())
        .sum::<usize>();
        println!("プロパティ上書き: {}件", n_overrides);
        println!();

        println!("=== 尤度 ===");
        println!("Poisson 項: {:?}", self.likelihood.poisson_form);
        for spec in self.fit.parameters.specs() {
            let bound = |b: Option<f64>| b.map_or("-".to_string(), |v| format!("{}", v));
            println!(
                "  {}: 初期値 {} [{}, {}] ステップ {}",
                spec.name,
                spec.initial,
                bound(spec.min),
                bound(spec.max),
                spec.step
            );
        }
    }
}

/// 上書き後の階層数が layout と一致するか確認
fn check_count(catalog: &PropertyCatalog, name: &str, expected: usize) -> Result<(), ScenarioError> {
    let count = catalog.fixed_count(name)?;
    if count != expected {
        return Err(ScenarioError::Validation(format!(
            "{} override ({}) disagrees with layout ({})",
            name, count, expected
        )));
    }
    Ok(())
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    Validation(String),
    #[error("プロパティ定義エラー: {0}")]
    Property(#[from] PropertyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
meta:
  version: "1.0"
  name: minimal
sim:
  seed: 7
  n_events: 3
"#;

    #[test]
    fn test_minimal_scenario_uses_defaults() {
        let config = ScenarioConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.sim.seed, 7);
        assert_eq!(config.sim.sampling, SamplingMode::Sampled);
        assert!(!config.sim.dark_noise);
        assert_eq!(config.layout.n_module, 7);
        assert_eq!(config.likelihood.poisson_form, PoissonForm::Unnormalized);
        assert_eq!(config.fit.parameters, ParameterDomain::default());
    }

    #[test]
    fn test_overrides_replace_and_add() {
        let yaml = r#"
meta: { version: "1.0", name: overrides }
sim: { seed: 1, n_events: 1, sampling: exact, dark_noise: true }
layout: { n_module: 2, module_pitch_mm: 500, n_sensor: 3, sensor_pitch_mm: 100 }
properties:
  sensor:
    - { name: qe_radial, type: bool, distribution: exact, mean: true }
    - { name: dark_noise_rate, type: float, distribution: exact, mean: 1000 }
  emitter:
    - { name: polarization, description: extra, type: float, distribution: norm, mean: 0.5, sigma: 0.1 }
likelihood: { poisson_form: normalized }
fit:
  profile_steps: 2
  parameters:
    t0: { name: t0, initial: 1.0, step: 0.25, min: -10, max: 10 }
"#;
        let config = ScenarioConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sim.sampling, SamplingMode::Exact);
        assert_eq!(config.likelihood.poisson_form, PoissonForm::Normalized);
        assert_eq!(config.fit.parameters.t0.step, 0.25);
        assert_eq!(config.fit.parameters.x, ParameterDomain::default().x);

        let catalogs = config.build_catalogs().unwrap();
        let sensor = catalogs.sensor.borrow();
        assert_eq!(sensor.design_value("qe_radial").unwrap(), PropertyValue::Bool(true));
        assert_eq!(
            sensor.design_value("dark_noise_rate").unwrap(),
            PropertyValue::Float(1000.0)
        );
        assert!(catalogs.emitter.borrow().get("polarization").is_some());
        assert_eq!(catalogs.detector.borrow().fixed_count("n_module").unwrap(), 2);
    }

    #[test]
    fn test_unknown_distribution_is_fatal() {
        let yaml = r#"
meta: { version: "1.0", name: bad }
sim: { seed: 1, n_events: 1 }
properties:
  sensor:
    - { name: width, type: float, distribution: lognormal, mean: 75.0, sigma: 0.1 }
"#;
        let config = ScenarioConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.build_catalogs(),
            Err(ScenarioError::Property(PropertyError::UnknownDistribution(_)))
        ));
    }

    #[test]
    fn test_duplicate_override_is_fatal() {
        let yaml = r#"
meta: { version: "1.0", name: duplicate }
sim: { seed: 1, n_events: 1 }
properties:
  sensor:
    - { name: qe, type: float, distribution: exact, mean: 0.5 }
    - { name: qe, type: float, distribution: exact, mean: 0.9 }
"#;
        let config = ScenarioConfig::from_yaml(yaml).unwrap();
        match config.build_catalogs() {
            Err(ScenarioError::Property(PropertyError::DuplicateName(name))) => assert_eq!(name, "qe"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        // 別の種別なら同じ名前でもよい
        let yaml = r#"
meta: { version: "1.0", name: per_kind }
sim: { seed: 1, n_events: 1 }
properties:
  sensor:
    - { name: note, type: float, distribution: exact, mean: 1.0 }
  emitter:
    - { name: note, type: float, distribution: exact, mean: 2.0 }
"#;
        assert!(ScenarioConfig::from_yaml(yaml).unwrap().build_catalogs().is_ok());
    }

    #[test]
    fn test_count_override_must_match_layout() {
        let yaml = r#"
meta: { version: "1.0", name: counts }
sim: { seed: 1, n_events: 1 }
properties:
  module:
    - { name: n_sensor, type: int, distribution: exact, mean: 6 }
"#;
        let config = ScenarioConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.build_catalogs(), Err(ScenarioError::Validation(_))));

        let yaml = r#"
meta: { version: "1.0", name: counts }
sim: { seed: 1, n_events: 1 }
layout: { n_module: 3, module_pitch_mm: 700.0, n_sensor: 5, sensor_pitch_mm: 115.0 }
properties:
  detector:
    - { name: n_module, type: int, distribution: exact, mean: 3 }
"#;
        let catalogs = ScenarioConfig::from_yaml(yaml).unwrap().build_catalogs().unwrap();
        assert_eq!(catalogs.detector.borrow().fixed_count("n_module").unwrap(), 3);
    }

    #[test]
    fn test_mean_type_must_match() {
        let o = PropertyOverride {
            name: "n_sensor".to_string(),
            description: String::new(),
            property_type: "int".to_string(),
            distribution: "exact".to_string(),
            mean: MeanValue::Float(4.5),
            sigma: 0.0,
        };
        assert!(matches!(o.to_descriptor(), Err(PropertyError::TypeMismatch { .. })));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ScenarioConfig::default();
        assert!(config.validate().is_ok());

        config.sim.n_events = 0;
        assert!(matches!(config.validate(), Err(ScenarioError::Validation(_))));

        let mut config = ScenarioConfig::default();
        config.fit.parameters.length.initial = 5000.0;
        assert!(matches!(config.validate(), Err(ScenarioError::Validation(_))));

        let mut config = ScenarioConfig::default();
        config.layout.sensor_pitch_mm = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bundled_default_scenario() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/default.yaml");
        let config = ScenarioConfig::from_file(path).unwrap();
        assert_eq!(config.fit.parameters, ParameterDomain::default());
        let catalogs = config.build_catalogs().unwrap();
        assert_eq!(
            catalogs.emitter.borrow().design_value("ch_density").unwrap(),
            PropertyValue::Float(0.1)
        );
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ScenarioConfig::from_file("no/such/scenario.yaml"),
            Err(ScenarioError::FileNotFound(_))
        ));
    }
}
