//! # Likelihood モジュール
//!
//! 観測イベントと期待値エンジンの出力を比較し、候補トラックパラメータに対する
//! 対数尤度を計算します。
//!
//! 期待値は常に検出器・センサーの**設計値**で計算します。フィットが真の値
//! （実現値）を参照することはありません。
//!
//! (モジュール, センサー) ごとに:
//!
//! - Poisson 項: `n_obs·ln(n_exp) − n_exp`（既定、log-factorial 項を省略）
//!   または正規化形 `n_obs·ln(n_exp) − n_exp − ln Γ(n_obs + 1)`
//! - `n_obs > 0` なら平均観測時刻の Gaussian 項 `−(t̄_obs − t_exp)² / (2 t_sig²) · n_obs`
//!
//! 省略形を既定にしているのは経験的に収束が良いためで、理論的に決着した選択ではありません。
//! ダークノイズは尤度モデルに含まれていません。

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use tracing::trace;

use crate::asimov::ExpectationEngine;
use crate::models::{
    detector::Detector,
    emitter::{Emitter, TrackParameters},
    event::Event,
    property::PropertyError,
    traits::ValueKind,
};

/// ln(0) を避けるために期待数へ加える下限
pub const N_EXPECTED_FLOOR: f64 = 1e-9;

/// Poisson 項の形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoissonForm {
    /// `n ln μ − μ`
    #[default]
    Unnormalized,
    /// `n ln μ − μ − ln Γ(n + 1)`
    Normalized,
}

/// Poisson 項
pub fn poisson_term(form: PoissonForm, n_observed: f64, n_expected: f64) -> f64 {
    let mu = n_expected + N_EXPECTED_FLOOR;
    let term = n_observed * mu.ln() - mu;
    match form {
        PoissonForm::Unnormalized => term,
        PoissonForm::Normalized => term - ln_gamma(n_observed + 1.0),
    }
}

/// 平均観測時刻の Gaussian 項（平均の分散は t_sig² / n_obs）
pub fn time_term(n_observed: f64, mean_observed_time: f64, t_expected: f64, t_sig: f64) -> f64 {
    if n_observed <= 0.0 || t_sig <= 0.0 {
        return 0.0;
    }
    -(mean_observed_time - t_expected).powi(2) / (2.0 * t_sig * t_sig) * n_observed
}

/// 尤度エンジン
#[derive(Debug, Clone)]
pub struct LikelihoodEngine {
    expectation: ExpectationEngine,
    form: PoissonForm,
}

impl LikelihoodEngine {
    /// 検出器とエミッターの設計値からエンジンを作成
    pub fn new(detector: &Detector, emitter: &Emitter, form: PoissonForm) -> Result<Self, PropertyError> {
        Ok(Self {
            expectation: ExpectationEngine::new(detector, emitter, ValueKind::Design)?,
            form,
        })
    }

    pub fn from_expectation(expectation: ExpectationEngine, form: PoissonForm) -> Self {
        Self { expectation, form }
    }

    pub fn expectation(&self) -> &ExpectationEngine {
        &self.expectation
    }

    pub fn form(&self) -> PoissonForm {
        self.form
    }

    /// イベントの対数尤度
    pub fn ln_likelihood(&self, event: &Event, parameters: &TrackParameters) -> f64 {
        let expectation = self.expectation.evaluate(parameters);
        let mut sum = 0.0;
        for (i_module, i_sensor, sensor) in self.expectation.layout().iter_sensors() {
            let expected = expectation
                .get(i_module, i_sensor)
                .copied()
                .unwrap_or_default();
            let n_observed = event.count(i_module, i_sensor);
            sum += poisson_term(self.form, n_observed, expected.n);
            if let Some(t_observed) = event.mean_time(i_module, i_sensor) {
                sum += time_term(n_observed, t_observed, expected.t, sensor.response.t_sig);
            }
        }
        trace!(ln_likelihood = sum, "LN_LIKELIHOOD");
        sum
    }
}

/// 1パラメータの探索範囲
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    pub initial: f64,
    /// 初期ステップ幅
    pub step: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ParameterSpec {
    pub fn new(name: &str, initial: f64, step: f64, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            initial,
            step,
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |m| value >= m) && self.max.map_or(true, |m| value <= m)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        let v = self.min.map_or(value, |m| value.max(m));
        self.max.map_or(v, |m| v.min(m))
    }
}

/// トラックパラメータの定義域（初期値・範囲・ステップ幅）
///
/// 最適化器（外部）に渡す設定で、尤度エンジン自体は範囲を強制しません。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParameterDomain {
    pub x: ParameterSpec,
    pub y: ParameterSpec,
    pub angle: ParameterSpec,
    pub length: ParameterSpec,
    pub t0: ParameterSpec,
}

impl Default for ParameterDomain {
    fn default() -> Self {
        Self {
            x: ParameterSpec::new("x", -2000.0, 10.0, Some(-5000.0), Some(0.0)),
            y: ParameterSpec::new("y", 0.0, 10.0, Some(-3000.0), Some(3000.0)),
            angle: ParameterSpec::new("angle", 0.0, 0.01, None, None),
            length: ParameterSpec::new("length", 1000.0, 10.0, Some(0.1), Some(3000.0)),
            t0: ParameterSpec::new("t0", 0.0, 0.5, Some(-100.0), Some(100.0)),
        }
    }
}

impl ParameterDomain {
    /// [`TrackParameters::NAMES`] の順序で並べたパラメータ
    pub fn specs(&self) -> [&ParameterSpec; 5] {
        [&self.x, &self.y, &self.angle, &self.length, &self.t0]
    }

    pub fn initial(&self) -> TrackParameters {
        TrackParameters::from_array(self.specs().map(|s| s.initial))
    }

    pub fn steps(&self) -> [f64; 5] {
        self.specs().map(|s| s.step)
    }

    pub fn contains(&self, parameters: &TrackParameters) -> bool {
        self.specs()
            .iter()
            .zip(parameters.to_array())
            .all(|(s, v)| s.contains(v))
    }

    pub fn clamp(&self, parameters: &TrackParameters) -> TrackParameters {
        let v = parameters.to_array();
        let specs = self.specs();
        TrackParameters::from_array(std::array::from_fn(|i| specs[i].clamp(v[i])))
    }
}

/// 最適化器から見た目的関数
///
/// 任意の範囲内の点で何度も呼び出されます。最小化器向けに −ln L を返します。
pub trait Objective {
    fn n_parameters(&self) -> usize;

    fn evaluate(&self, parameters: &[f64]) -> f64;
}

/// 1イベントの負の対数尤度
pub struct EventObjective<'a> {
    engine: &'a LikelihoodEngine,
    event: &'a Event,
}

impl<'a> EventObjective<'a> {
    pub fn new(engine: &'a LikelihoodEngine, event: &'a Event) -> Self {
        Self { engine, event }
    }
}

impl Objective for EventObjective<'_> {
    fn n_parameters(&self) -> usize {
        TrackParameters::NAMES.len()
    }

    fn evaluate(&self, parameters: &[f64]) -> f64 {
        match <[f64; 5]>::try_from(parameters) {
            Ok(v) => -self
                .engine
                .ln_likelihood(self.event, &TrackParameters::from_array(v)),
            Err(_) => f64::INFINITY,
        }
    }
}

/// プロファイルの1点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePoint {
    pub value: f64,
    pub ln_likelihood: f64,
}

/// 1パラメータに沿った対数尤度の走査
///
/// `center` から ±`n_steps` ステップ（定義域のステップ幅）を評価します。
/// 範囲外の点は定義域の端にクリップされます。
pub fn profile_scan(
    engine: &LikelihoodEngine,
    event: &Event,
    center: &TrackParameters,
    index: usize,
    domain: &ParameterDomain,
    n_steps: usize,
) -> Vec<ProfilePoint> {
    let specs = domain.specs();
    let Some(spec) = specs.get(index) else {
        return Vec::new();
    };
    let n = n_steps as i64;
    (-n..=n)
        .map(|k| {
            let mut v = center.to_array();
            v[index] = spec.clamp(v[index] + k as f64 * spec.step);
            let parameters = TrackParameters::from_array(v);
            ProfilePoint {
                value: v[index],
                ln_likelihood: engine.ln_likelihood(event, &parameters),
            }
        })
        .collect()
}

/// プロファイル中で対数尤度が最大の点
pub fn profile_maximum(profile: &[ProfilePoint]) -> Option<ProfilePoint> {
    profile
        .iter()
        .copied()
        .filter(|p| p.ln_likelihood.is_finite())
        .max_by(|a, b| a.ln_likelihood.total_cmp(&b.ln_likelihood))
}
