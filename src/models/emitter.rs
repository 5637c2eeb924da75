use rand::Rng;
use rand_distr::{Distribution as _, Exp};
use tracing::{debug, warn};

use crate::models::{
    common::Point2D,
    photon::Photon,
    property::{Distribution, PropertyCatalog, PropertyError, SharedCatalog},
    traits::{DeviceCore, DeviceKind, IDevice, SamplingMode, ValueKind},
};

/// 1トラックあたりの光子数の上限
pub const MAX_PHOTONS: usize = 100_000;

/// トラックの幾何パラメータ（フィット対象）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackParameters {
    /// 始点 x（mm）
    pub x: f64,
    /// 始点 y（mm）
    pub y: f64,
    /// x軸に対する方向（rad）
    pub angle: f64,
    /// 放射する経路長（mm）
    pub length: f64,
    /// 始点での時刻（ns）
    pub t0: f64,
}

impl TrackParameters {
    /// パラメータ名（配列表現の順序）
    pub const NAMES: [&'static str; 5] = ["x", "y", "angle", "length", "t0"];

    pub fn to_array(&self) -> [f64; 5] {
        [self.x, self.y, self.angle, self.length, self.t0]
    }

    pub fn from_array(v: [f64; 5]) -> Self {
        Self {
            x: v[0],
            y: v[1],
            angle: v[2],
            length: v[3],
            t0: v[4],
        }
    }

    pub fn start(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    pub fn direction(&self) -> Point2D {
        Point2D::unit(self.angle)
    }
}

/// 放射の物理パラメータ（フィット対象外）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterOptics {
    /// チェレンコフ半頂角（rad）
    pub ch_angle: f64,
    /// 単位長さあたりの光子数（/mm）
    pub density: f64,
    /// 荷電粒子の速度（mm/ns）
    pub velocity: f64,
}

/// 1回の放射の結果
#[derive(Debug, Clone, Default)]
pub struct Emission {
    pub photons: Vec<Photon>,
    /// 上限 [`MAX_PHOTONS`] に達してトラックの途中で打ち切られた
    pub truncated: bool,
}

/// エミッター（チェレンコフ光を放射する荷電粒子トラック）
#[derive(Debug)]
pub struct Emitter {
    core: DeviceCore,
}

impl Emitter {
    pub fn new<R: Rng + ?Sized>(
        id: usize,
        catalog: &SharedCatalog,
        mode: SamplingMode,
        rng: &mut R,
    ) -> Result<Self, PropertyError> {
        Ok(Self {
            core: DeviceCore::build(id, catalog, mode, rng)?,
        })
    }

    /// エミッターのデフォルト設計プロパティ
    pub fn default_catalog() -> Result<PropertyCatalog, PropertyError> {
        use Distribution::*;
        let mut c = PropertyCatalog::new(DeviceKind::Emitter);

        // 始点、方向、長さ
        c.add_float("x", "x coordinate of starting point (mm)", Normal, -2000.0, 0.1)?;
        c.add_float("y", "y coordinate of starting point (mm)", Normal, 0.0, 0.1)?;
        c.add_float("angle", "angle wrt to x axis (rad)", Normal, 0.0, 0.1)?;
        c.add_float("length", "path length of emission (mm)", Normal, 1000.0, 0.1)?;

        // チェレンコフ角
        c.add_float("ch_angle", "cherenkov emission angle (rad)", Normal, 0.733, 0.001)?;

        // 単位長さあたりの放射確率
        c.add_float("ch_density", "cherenkov emission probability (per mm)", Normal, 0.01, 0.00001)?;

        c.add_float("velocity", "velocity of the emitter particle (mm/ns)", Exact, 299.79, 0.0)?;

        Ok(c)
    }

    /// トラックの幾何パラメータ
    pub fn track(&self, t0: f64, kind: ValueKind) -> Result<TrackParameters, PropertyError> {
        Ok(TrackParameters {
            x: self.get_f64("x", kind)?,
            y: self.get_f64("y", kind)?,
            angle: self.get_f64("angle", kind)?,
            length: self.get_f64("length", kind)?,
            t0,
        })
    }

    pub fn optics(&self, kind: ValueKind) -> Result<EmitterOptics, PropertyError> {
        Ok(EmitterOptics {
            ch_angle: self.get_f64("ch_angle", kind)?,
            density: self.get_f64("ch_density", kind)?,
            velocity: self.get_f64("velocity", kind)?,
        })
    }

    /// 時刻 `t0` から始まるトラックに沿ってチェレンコフ光子を放射
    ///
    /// 放射間隔は密度をレートとする指数分布に従い、各光子はコーンの左右どちらかに
    /// 等確率で放射されます。経路長を超えるか光子数が [`MAX_PHOTONS`] に達すると
    /// 終了します。上限に達した場合は `truncated` を立てて警告を出力します。
    pub fn emit<R: Rng + ?Sized>(&self, t0: f64, rng: &mut R) -> Result<Emission, PropertyError> {
        let track = self.track(t0, ValueKind::Realized)?;
        let optics = self.optics(ValueKind::Realized)?;
        let gap = Exp::new(optics.density).map_err(|e| PropertyError::InvalidParameters {
            name: "ch_density".to_string(),
            reason: e.to_string(),
        })?;

        let direction = track.direction();
        let mut photons = Vec::new();
        let mut dist = 0.0;
        let mut truncated = false;
        loop {
            let travel: f64 = gap.sample(rng);
            dist += travel;
            if dist >= track.length {
                break;
            }
            if photons.len() >= MAX_PHOTONS {
                truncated = true;
                break;
            }
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let position = track.start() + direction * dist;
            photons.push(Photon::new(
                t0 + dist / optics.velocity,
                position.x,
                position.y,
                track.angle + sign * optics.ch_angle,
                rng,
            ));
        }

        if truncated {
            warn!(
                emitter_id = self.get_id(),
                max_photons = MAX_PHOTONS,
                covered_length = dist,
                track_length = track.length,
                "EMISSION_TRUNCATED: 光子数の上限に達したためトラックの放射を打ち切りました"
            );
        } else {
            debug!(
                emitter_id = self.get_id(),
                n_photons = photons.len(),
                track_length = track.length,
                "PHOTONS_EMITTED: 光子を放射しました"
            );
        }

        Ok(Emission { photons, truncated })
    }
}

impl IDevice for Emitter {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Emitter
    }
}
