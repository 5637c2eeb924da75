//! # Transport モジュール
//!
//! 光子の検出（確率的な光子輸送の後半）を扱います。
//!
//! 各光子について、進行方向の前方にあるモジュール面との交点が有効幅に入る
//! 最初のモジュールを探し（1光子につき高々1モジュール）、その中で同様に
//! 最初のセンサーを探します。後方の面には到達しません。
//! センサーに当たった光子は、入射角と中心からの距離で補正した量子効率が
//! 光子の持つ一様乱数を上回る場合に光電子へ変換され、到達時刻が記録されます。
//!
//! 最後に任意でダークノイズのパルスを追加します。この段階は尤度モデルに
//! 含まれません（既知のモデル化の差異としてそのまま残しています）。

use rand::Rng;
use rand_distr::{Distribution as _, Poisson};
use tracing::{debug, info};

use crate::models::{
    common::{intersect_ahead, math_utils},
    detector::{Detector, DetectorLayout},
    event::Event,
    photon::{Photon, PHOTON_VELOCITY},
    property::PropertyError,
    traits::ValueKind,
};

/// 1光子の検出結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub i_module: usize,
    pub i_sensor: usize,
    /// 到達時刻（ns）
    pub t: f64,
}

/// Hz → /ns
const PER_NS: f64 = 1e-9;

/// 1光子を検出器配置に通す
///
/// # 戻り値
///
/// 光電子に変換された場合は `Some(Hit)`
pub fn detect_photon(layout: &DetectorLayout, photon: &Photon) -> Option<Hit> {
    let origin = photon.position();
    let (i_module, module) = layout.modules.iter().enumerate().find(|(_, module)| {
        intersect_ahead(origin, photon.angle, module.orientation)
            .map(|p| p.distance(&module.orientation.position()) < module.width / 2.0)
            .unwrap_or(false)
    })?;

    for (i_sensor, sensor) in module.sensors.iter().enumerate() {
        let Ok(p) = intersect_ahead(origin, photon.angle, sensor.orientation) else {
            continue;
        };
        let h = sensor.response.half_width();
        let r = p.distance(&sensor.orientation.position());
        if r >= h {
            continue;
        }

        let radial_fraction = r / h;
        let cos_theta = math_utils::incidence_cosine(photon.angle, sensor.orientation.angle);
        let qe = sensor.response.quantum_efficiency(cos_theta, radial_fraction);
        if qe <= photon.uniform {
            return None;
        }

        let t = photon.t
            + origin.distance(&p) / PHOTON_VELOCITY
            + sensor.response.transit_delay(radial_fraction)
            + sensor.response.t_sig * photon.normal;
        return Some(Hit { i_module, i_sensor, t });
    }
    None
}

/// 解決済みの配置で光子列からイベントを作成
///
/// 乱数を使わないため、同じ光子列に対して異なる配置を比較できます。
pub fn detect(layout: &DetectorLayout, photons: &[Photon]) -> Event {
    let mut event = Event::new(&layout.shape());
    for hit in photons.iter().filter_map(|p| detect_photon(layout, p)) {
        event.add_pe(hit.i_module, hit.i_sensor, hit.t);
    }
    event
}

/// ダークノイズのパルスを追加
///
/// 各センサーで Poisson(rate × window) 個のパルスを、全センサーの平均観測時刻を
/// 中心とする読み出し窓内に一様に配置します（観測がなければ 0 を中心とします）。
pub fn add_dark_noise<R: Rng + ?Sized>(event: &mut Event, layout: &DetectorLayout, rng: &mut R) -> usize {
    let window = layout.readout_window;
    let center = event.mean_time_all().unwrap_or(0.0);
    let mut added = 0;
    for (i_module, i_sensor, sensor) in layout.iter_sensors() {
        let mu = sensor.response.dark_noise_rate * PER_NS * window;
        if mu <= 0.0 {
            continue;
        }
        let Ok(poisson) = Poisson::new(mu) else {
            continue;
        };
        let n: f64 = poisson.sample(rng);
        for _ in 0..n as u64 {
            let t = center + window * (rng.gen_range(0.0..1.0) - 0.5);
            event.add_pe(i_module, i_sensor, t);
            added += 1;
        }
    }
    added
}

/// 検出器の実現値（真の値）で光子列からイベントを作成
pub fn get_event<R: Rng + ?Sized>(
    detector: &Detector,
    photons: &[Photon],
    dark_noise: bool,
    rng: &mut R,
) -> Result<Event, PropertyError> {
    let layout = detector.layout(ValueKind::Realized)?;
    let mut event = detect(&layout, photons);
    let n_signal = event.total_count();

    if dark_noise {
        let added = add_dark_noise(&mut event, &layout, rng);
        debug!(n_dark = added, "DARK_NOISE_ADDED: ダークノイズを追加しました");
    }

    info!(
        detector_id = crate::models::traits::IDevice::get_id(detector),
        n_photons = photons.len(),
        n_signal,
        n_total = event.total_count(),
        "EVENT_DETECTED: イベントを生成しました"
    );
    Ok(event)
}
