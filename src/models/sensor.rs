use rand::Rng;

use crate::models::{
    property::{Distribution, PropertyCatalog, PropertyError, PropertyType, PropertyValue, SharedCatalog},
    traits::{DeviceCore, DeviceKind, IDevice, SamplingMode, ValueKind},
};

/// 光センサー
///
/// 入射した光子を量子効率に従って光電子に変換し、時刻付きのパルスを生成します。
/// 幅・量子効率（角度依存、半径依存の補正は任意）・時間分解能・走行時間・
/// ダークノイズレートをプロパティとして持ちます。
#[derive(Debug)]
pub struct Sensor {
    core: DeviceCore,
}

/// センサー応答の解決済みパラメータ
///
/// ホットパスで文字列検索を避けるため、評価ごとに一度だけ解決します。
/// 補正係数は対応するスイッチが無効な場合 `None` になります。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorResponse {
    /// 有効面の幅（mm）
    pub width: f64,
    /// 基本の量子効率
    pub qe: f64,
    pub qe_angle_coeff: Option<f64>,
    pub qe_radial_coeff: Option<f64>,
    /// 時間分解能（ns）
    pub t_sig: f64,
    /// 平均走行時間（ns）
    pub td: f64,
    pub td_radial_coeff: Option<f64>,
    /// ダークノイズレート（Hz）
    pub dark_noise_rate: f64,
}

impl SensorResponse {
    pub fn half_width(&self) -> f64 {
        self.width / 2.0
    }

    /// 入射角による補正係数
    ///
    /// `cos_theta` はセンサー法線に対する入射角の余弦
    pub fn angular_factor(&self, cos_theta: f64) -> f64 {
        match self.qe_angle_coeff {
            Some(c) if c > 0.0 => 1.0 - (-1.0 / (c * cos_theta)).exp(),
            _ => 1.0,
        }
    }

    /// 中心からの距離による補正係数（`radial_fraction` = r/h）
    pub fn radial_factor(&self, radial_fraction: f64) -> f64 {
        match self.qe_radial_coeff {
            Some(c) => (1.0 + c * radial_fraction) / (1.0 + c.abs()),
            None => 1.0,
        }
    }

    /// 入射位置・入射角に対する量子効率
    pub fn quantum_efficiency(&self, cos_theta: f64, radial_fraction: f64) -> f64 {
        self.qe * self.angular_factor(cos_theta) * self.radial_factor(radial_fraction)
    }

    /// 入射位置に対する走行時間
    pub fn transit_delay(&self, radial_fraction: f64) -> f64 {
        match self.td_radial_coeff {
            Some(c) => self.td * (1.0 + c * radial_fraction),
            None => self.td,
        }
    }

    /// 半径補正係数の [0, h] 一様平均: (1 + c_q/2)/(1 + |c_q|)
    pub fn mean_radial_factor(&self) -> f64 {
        match self.qe_radial_coeff {
            Some(c) => (1.0 + c / 2.0) / (1.0 + c.abs()),
            None => 1.0,
        }
    }

    /// 検出された光子についての走行時間の平均
    ///
    /// 量子効率の半径依存で重み付けした平均:
    /// `td × (1 + c_td/2 + c_q/2 + c_td·c_q/3) / (1 + c_q/2)`
    pub fn mean_transit_delay(&self) -> f64 {
        let c_td = self.td_radial_coeff.unwrap_or(0.0);
        let c_q = self.qe_radial_coeff.unwrap_or(0.0);
        let norm = 1.0 + c_q / 2.0;
        if norm.abs() < f64::EPSILON {
            return self.td * (1.0 + c_td / 2.0);
        }
        self.td * (1.0 + c_td / 2.0 + c_q / 2.0 + c_td * c_q / 3.0) / norm
    }
}

impl Sensor {
    /// 新しいセンサーを作成します
    ///
    /// カタログの全プロパティがこの時点で実現されます。
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

    /// センサーのデフォルト設計プロパティ
    pub fn default_catalog() -> Result<PropertyCatalog, PropertyError> {
        use Distribution::*;
        let mut c = PropertyCatalog::new(DeviceKind::Sensor);

        // サイズ
        c.add_float("width", "width of photosensor active surface (mm)", Normal, 75.0, 0.1)?;

        // タイミング
        c.add_float("t_sig", "timing resolution (ns)", Normal, 1.5, 0.05)?;
        c.add_float("td", "mean transit delay (ns)", Normal, 1.0, 0.05)?;
        c.add_property(
            "td_radial",
            "transit delay radial dependence included",
            PropertyType::Bool,
            Exact,
            PropertyValue::Bool(false),
            0.0,
        )?;
        c.add_float("td_radial_coeff", "transit delay radial coefficient", Normal, 0.5, 0.01)?;

        // 量子効率
        c.add_float("qe", "quantum efficiency", Beta, 0.8, 0.01)?;
        c.add_property(
            "qe_angle",
            "qe angle dependence included",
            PropertyType::Bool,
            Exact,
            PropertyValue::Bool(false),
            0.0,
        )?;
        c.add_float("qe_angle_coeff", "qe angle coefficient", Normal, 0.5, 0.01)?;
        c.add_property(
            "qe_radial",
            "qe radial dependence included",
            PropertyType::Bool,
            Exact,
            PropertyValue::Bool(false),
            0.0,
        )?;
        c.add_float("qe_radial_coeff", "qe radial coefficient", Normal, 0.5, 0.01)?;

        // ダークノイズ（尤度には含まれない）
        c.add_float("dark_noise_rate", "rate of random single pe pulses (Hz)", Exact, 0.0, 0.0)?;

        Ok(c)
    }

    /// 応答パラメータを解決
    pub fn response(&self, kind: ValueKind) -> Result<SensorResponse, PropertyError> {
        let gated = |switch: &str, coeff: &str| -> Result<Option<f64>, PropertyError> {
            if self.get_bool(switch, kind)? {
                Ok(Some(self.get_f64(coeff, kind)?))
            } else {
                Ok(None)
            }
        };
        Ok(SensorResponse {
            width: self.get_f64("width", kind)?,
            qe: self.get_f64("qe", kind)?,
            qe_angle_coeff: gated("qe_angle", "qe_angle_coeff")?,
            qe_radial_coeff: gated("qe_radial", "qe_radial_coeff")?,
            t_sig: self.get_f64("t_sig", kind)?,
            td: self.get_f64("td", kind)?,
            td_radial_coeff: gated("td_radial", "td_radial_coeff")?,
            dark_noise_rate: self.get_f64("dark_noise_rate", kind)?,
        })
    }
}

impl IDevice for Sensor {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Sensor
    }
}
