//! # Simulation モジュール
//!
//! シナリオから検出器階層とエミッターを構築し、イベントを1つずつ生成して
//! 真のトラックでの対数尤度とプロファイルを評価する実行エンジンです。
//!
//! ## 1イベントの処理順序
//!
//! 1. **放射**: エミッターの実現値でトラックに沿って光子を放射
//! 2. **検出**: 検出器の実現値で光子を輸送し、必要ならダークノイズを追加
//! 3. **評価**: 設計値の尤度エンジンで、真のトラックでの ln L と
//!    各パラメータに沿ったプロファイルを計算
//!
//! 乱数生成器は1つだけで、構築と全イベントを通して順に使われます。
//! 同じシードからは同じ結果が得られます。
//!
//! ## 使用例
//!
//! ```no_run
//! use ringsim::scenario::ScenarioConfig;
//! use ringsim::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/default.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let summary = engine.run()?;
//! println!("平均ヒット数: {:.1}", summary.mean_hits());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::likelihood::{profile_maximum, profile_scan, LikelihoodEngine, ProfilePoint};
use crate::models::{
    detector::Detector,
    emitter::{Emitter, TrackParameters},
    event::Event,
    property::PropertyError,
    traits::ValueKind,
};
use crate::scenario::{ScenarioConfig, ScenarioError};
use crate::transport;

/// シミュレーション実行エラー
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error("シミュレーションエンジンが初期化されていません")]
    NotInitialized,
}

/// 構築済みの装置一式
#[derive(Debug)]
pub struct Apparatus {
    pub detector: Detector,
    pub emitter: Emitter,
    pub likelihood: LikelihoodEngine,
}

/// 1イベントの結果
#[derive(Debug, Clone)]
pub struct EventSummary {
    pub index: usize,
    /// エミッターの実現値から決まる真のトラック
    pub truth: TrackParameters,
    pub n_photons: usize,
    pub truncated: bool,
    pub n_hits: f64,
    pub ln_likelihood: f64,
    /// パラメータごとのプロファイル（[`TrackParameters::NAMES`] の順）
    pub profiles: Vec<Vec<ProfilePoint>>,
    pub event: Event,
}

impl EventSummary {
    /// 各パラメータのプロファイル最大点
    pub fn profile_maxima(&self) -> Vec<Option<ProfilePoint>> {
        self.profiles.iter().map(|p| profile_maximum(p)).collect()
    }
}

/// 実行全体の結果
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub events: Vec<EventSummary>,
}

impl RunSummary {
    pub fn mean_hits(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        self.events.iter().map(|e| e.n_hits).sum::<f64>() / self.events.len() as f64
    }

    pub fn n_truncated(&self) -> usize {
        self.events.iter().filter(|e| e.truncated).count()
    }
}

pub struct SimulationEngine {
    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
    rng: Xoshiro256StarStar,
    apparatus: Option<Apparatus>,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        let rng = Xoshiro256StarStar::seed_from_u64(scenario.sim.seed);
        Self {
            scenario_config: scenario,
            verbose_level,
            rng,
            apparatus: None,
        }
    }

    /// カタログを作成し、検出器階層とエミッターを構築
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        let config = &self.scenario_config;
        if self.verbose_level > 0 {
            info!(scenario = %config.meta.name, seed = config.sim.seed, "INIT: シミュレーションエンジンを初期化中");
        }

        let catalogs = config.build_catalogs()?;
        let mode = config.sim.sampling;
        let detector = Detector::new(
            0,
            &catalogs.detector,
            &catalogs.module,
            &catalogs.sensor,
            mode,
            &mut self.rng,
        )?;
        let emitter = Emitter::new(0, &catalogs.emitter, mode, &mut self.rng)?;
        let likelihood = LikelihoodEngine::new(&detector, &emitter, config.likelihood.poisson_form)?;

        if self.verbose_level > 0 {
            info!(
                n_module = detector.n_module(),
                n_sensor = detector.layout(ValueKind::Design)?.iter_sensors().count(),
                sampling = ?mode,
                poisson_form = ?likelihood.form(),
                "INIT_DONE: 初期化完了"
            );
        }

        self.apparatus = Some(Apparatus {
            detector,
            emitter,
            likelihood,
        });
        Ok(())
    }

    pub fn apparatus(&self) -> Option<&Apparatus> {
        self.apparatus.as_ref()
    }

    /// 1イベントを生成して評価
    pub fn run_event(&mut self, index: usize) -> Result<EventSummary, SimulationError> {
        let apparatus = self.apparatus.as_ref().ok_or(SimulationError::NotInitialized)?;
        let sim = &self.scenario_config.sim;
        let fit = &self.scenario_config.fit;

        let emission = apparatus.emitter.emit(sim.t0_ns, &mut self.rng)?;
        if emission.truncated {
            warn!(event = index, "EVENT_TRUNCATED: 光子数の上限に達したイベントです");
        }
        let event = transport::get_event(
            &apparatus.detector,
            &emission.photons,
            sim.dark_noise,
            &mut self.rng,
        )?;

        let truth = apparatus
            .emitter
            .track(sim.t0_ns, ValueKind::Realized)?;
        let ln_likelihood = apparatus.likelihood.ln_likelihood(&event, &truth);
        let profiles: Vec<Vec<ProfilePoint>> = (0..TrackParameters::NAMES.len())
            .map(|i| {
                profile_scan(
                    &apparatus.likelihood,
                    &event,
                    &truth,
                    i,
                    &fit.parameters,
                    fit.profile_steps,
                )
            })
            .collect();

        debug!(
            event = index,
            n_photons = emission.photons.len(),
            n_hits = event.total_count(),
            ln_likelihood,
            "EVENT_EVALUATED: 真のトラックで尤度を評価しました"
        );

        Ok(EventSummary {
            index,
            truth,
            n_photons: emission.photons.len(),
            truncated: emission.truncated,
            n_hits: event.total_count(),
            ln_likelihood,
            profiles,
            event,
        })
    }

    /// シナリオのイベント数だけ実行
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        if self.apparatus.is_none() {
            return Err(SimulationError::NotInitialized);
        }
        let n_events = self.scenario_config.sim.n_events;
        info!(n_events, "RUN_START: シミュレーション実行開始");

        let mut summary = RunSummary::default();
        for index in 0..n_events {
            let event = self.run_event(index)?;
            if self.verbose_level > 1 {
                info!(
                    event = index,
                    n_hits = event.n_hits,
                    ln_likelihood = event.ln_likelihood,
                    "進行状況: {}/{}",
                    index + 1,
                    n_events
                );
            }
            summary.events.push(event);
        }

        info!(
            n_events,
            mean_hits = summary.mean_hits(),
            n_truncated = summary.n_truncated(),
            "RUN_DONE: シミュレーション完了"
        );
        Ok(summary)
    }
}
