/// 1センサー分の記録
///
/// 生の到達時刻リストと、(個数, 時刻和) の集約形は同じヒットの等価な表現です。
/// 期待値（Asimov）イベントは非整数の個数を持つため集約形のみになります。
#[derive(Debug, Clone, PartialEq)]
pub enum SensorRecord {
    Times(Vec<f64>),
    Aggregate { count: f64, time_sum: f64 },
}

impl Default for SensorRecord {
    fn default() -> Self {
        SensorRecord::Times(Vec::new())
    }
}

impl SensorRecord {
    pub fn count(&self) -> f64 {
        match self {
            SensorRecord::Times(times) => times.len() as f64,
            SensorRecord::Aggregate { count, .. } => *count,
        }
    }

    pub fn time_sum(&self) -> f64 {
        match self {
            SensorRecord::Times(times) => times.iter().sum(),
            SensorRecord::Aggregate { time_sum, .. } => *time_sum,
        }
    }

    /// 平均到達時刻（ヒットがなければ `None`）
    pub fn mean_time(&self) -> Option<f64> {
        let n = self.count();
        if n > 0.0 {
            Some(self.time_sum() / n)
        } else {
            None
        }
    }

    /// 生の到達時刻（集約形では `None`）
    pub fn times(&self) -> Option<&[f64]> {
        match self {
            SensorRecord::Times(times) => Some(times),
            SensorRecord::Aggregate { .. } => None,
        }
    }

    fn push(&mut self, t: f64) {
        match self {
            SensorRecord::Times(times) => times.push(t),
            SensorRecord::Aggregate { count, time_sum } => {
                *count += 1.0;
                *time_sum += t;
            }
        }
    }
}

/// イベント
///
/// (モジュール, センサー) ごとのヒットの集合です。光子輸送の1回の実行、
/// または期待値エンジンの1回の呼び出しで作られ、以降は読み取り専用です。
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    modules: Vec<Vec<SensorRecord>>,
}

impl Event {
    /// モジュールごとのセンサー数から空のイベントを作成
    pub fn new(shape: &[usize]) -> Self {
        Self {
            modules: shape.iter().map(|&n| vec![SensorRecord::default(); n]).collect(),
        }
    }

    /// 集約形の記録からイベントを作成（期待値イベント用）
    pub fn from_aggregates(modules: Vec<Vec<(f64, f64)>>) -> Self {
        Self {
            modules: modules
                .into_iter()
                .map(|sensors| {
                    sensors
                        .into_iter()
                        .map(|(count, time_sum)| SensorRecord::Aggregate { count, time_sum })
                        .collect()
                })
                .collect(),
        }
    }

    /// ヒットを追加
    pub(crate) fn add_pe(&mut self, i_module: usize, i_sensor: usize, t: f64) {
        if let Some(record) = self
            .modules
            .get_mut(i_module)
            .and_then(|m| m.get_mut(i_sensor))
        {
            record.push(t);
        }
    }

    pub fn record(&self, i_module: usize, i_sensor: usize) -> Option<&SensorRecord> {
        self.modules.get(i_module).and_then(|m| m.get(i_sensor))
    }

    pub fn count(&self, i_module: usize, i_sensor: usize) -> f64 {
        self.record(i_module, i_sensor).map_or(0.0, |r| r.count())
    }

    pub fn mean_time(&self, i_module: usize, i_sensor: usize) -> Option<f64> {
        self.record(i_module, i_sensor).and_then(|r| r.mean_time())
    }

    pub fn shape(&self) -> Vec<usize> {
        self.modules.iter().map(|m| m.len()).collect()
    }

    /// (モジュール番号, センサー番号, 記録) の列挙
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &SensorRecord)> {
        self.modules.iter().enumerate().flat_map(|(i_module, sensors)| {
            sensors
                .iter()
                .enumerate()
                .map(move |(i_sensor, record)| (i_module, i_sensor, record))
        })
    }

    /// 全センサーのヒット数の合計
    pub fn total_count(&self) -> f64 {
        self.iter().map(|(_, _, r)| r.count()).sum()
    }

    /// 全センサーを通した平均到達時刻
    pub fn mean_time_all(&self) -> Option<f64> {
        let n = self.total_count();
        if n > 0.0 {
            Some(self.iter().map(|(_, _, r)| r.time_sum()).sum::<f64>() / n)
        } else {
            None
        }
    }

    /// 集約形に変換したイベント
    pub fn aggregated(&self) -> Self {
        Self {
            modules: self
                .modules
                .iter()
                .map(|sensors| {
                    sensors
                        .iter()
                        .map(|r| SensorRecord::Aggregate {
                            count: r.count(),
                            time_sum: r.time_sum(),
                        })
                        .collect()
                })
                .collect(),
        }
    }
}
