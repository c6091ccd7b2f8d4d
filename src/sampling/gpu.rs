//! Optional GPU utilization probe backed by `nvidia-smi`.
//!
//! The probe is detected once at startup. When the utility is missing the
//! probe reports itself absent and callers omit GPU data entirely.

use serde::Deserialize;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{CmdprofError, Result};

const NVIDIA_SMI: &str = "nvidia-smi";

/// Outcome of probing every GPU once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpuReading {
    /// No usable GPU data this tick.
    Unavailable,
    /// Mean utilization across `devices`; `failed` of them contributed zero.
    Utilization {
        percent: f64,
        devices: usize,
        failed: usize,
    },
}

impl GpuReading {
    pub fn percent(&self) -> Option<f64> {
        match self {
            GpuReading::Unavailable => None,
            GpuReading::Utilization { percent, .. } => Some(*percent),
        }
    }
}

/// A source of GPU utilization readings.
pub trait GpuProbe: Send {
    /// Whether a GPU utility was detected. Absent probes never show up in
    /// sample lines or reports.
    fn is_present(&self) -> bool;

    /// Queries all devices once.
    fn probe(&mut self) -> Result<GpuReading>;
}

/// Probe used when no GPU utility exists or GPU sampling is disabled.
#[derive(Debug, Default)]
pub struct NoGpu;

impl GpuProbe for NoGpu {
    fn is_present(&self) -> bool {
        false
    }

    fn probe(&mut self) -> Result<GpuReading> {
        Ok(GpuReading::Unavailable)
    }
}

/// Queries `nvidia-smi -q -x` on every probe.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: PathBuf,
}

impl NvidiaSmi {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Looks for `nvidia-smi` on `PATH`.
    pub fn detect() -> Option<Self> {
        find_on_path(NVIDIA_SMI, env::var_os("PATH")).map(Self::new)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl GpuProbe for NvidiaSmi {
    fn is_present(&self) -> bool {
        true
    }

    fn probe(&mut self) -> Result<GpuReading> {
        let output = Command::new(&self.program)
            .args(["-q", "-x"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| CmdprofError::Probe(format!("failed to run {:?}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(CmdprofError::Probe(format!(
                "{:?} exited with {}",
                self.program, output.status
            )));
        }

        let devices = parse_nvidia_smi_xml(&String::from_utf8_lossy(&output.stdout))?;
        Ok(aggregate_utilization(&devices))
    }
}

/// Picks the probe for this run: `nvidia-smi` when enabled and installed.
pub fn detect_probe(enabled: bool) -> Box<dyn GpuProbe> {
    if !enabled {
        log::debug!("GPU sampling disabled");
        return Box::new(NoGpu);
    }

    match NvidiaSmi::detect() {
        Some(smi) => {
            log::debug!("using {:?} for GPU sampling", smi.program());
            Box::new(smi)
        }
        None => {
            log::debug!("{} not found on PATH, GPU sampling off", NVIDIA_SMI);
            Box::new(NoGpu)
        }
    }
}

fn find_on_path(program: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    let path_var = path_var?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[derive(Debug, Deserialize)]
struct SmiLog {
    #[serde(rename = "gpu", default)]
    gpus: Vec<SmiGpu>,
}

#[derive(Debug, Deserialize)]
struct SmiGpu {
    #[serde(default)]
    utilization: Option<SmiUtilization>,
}

#[derive(Debug, Deserialize)]
struct SmiUtilization {
    #[serde(default)]
    gpu_util: Option<String>,
}

/// Extracts per-device utilization from `nvidia-smi -q -x` output.
///
/// Devices whose value cannot be parsed (e.g. `N/A`) come back as `None`.
pub fn parse_nvidia_smi_xml(xml: &str) -> Result<Vec<Option<f64>>> {
    let log: SmiLog = quick_xml::de::from_str(xml)
        .map_err(|e| CmdprofError::Probe(format!("unreadable nvidia-smi output: {}", e)))?;

    Ok(log
        .gpus
        .iter()
        .map(|gpu| {
            gpu.utilization
                .as_ref()
                .and_then(|u| u.gpu_util.as_deref())
                .and_then(parse_util_value)
        })
        .collect())
}

/// Parses values like `37 %`.
fn parse_util_value(raw: &str) -> Option<f64> {
    raw.split_whitespace()
        .next()
        .and_then(|token| token.trim_end_matches('%').parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// Mean utilization across devices; unparseable devices count as zero.
pub fn aggregate_utilization(devices: &[Option<f64>]) -> GpuReading {
    if devices.is_empty() {
        return GpuReading::Unavailable;
    }

    let failed = devices.iter().filter(|d| d.is_none()).count();
    let total: f64 = devices.iter().map(|d| d.unwrap_or(0.0)).sum();

    GpuReading::Utilization {
        percent: total / devices.len() as f64,
        devices: devices.len(),
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TWO_GPUS: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE nvidia_smi_log SYSTEM "nvsmi_device_v12.dtd">
<nvidia_smi_log>
    <timestamp>Tue Mar  5 10:00:00 2024</timestamp>
    <driver_version>550.54.14</driver_version>
    <attached_gpus>2</attached_gpus>
    <gpu id="00000000:01:00.0">
        <product_name>NVIDIA A100</product_name>
        <utilization>
            <gpu_util>N/A</gpu_util>
            <memory_util>0 %</memory_util>
        </utilization>
    </gpu>
    <gpu id="00000000:02:00.0">
        <product_name>NVIDIA A100</product_name>
        <utilization>
            <gpu_util>37 %</gpu_util>
            <memory_util>12 %</memory_util>
        </utilization>
    </gpu>
</nvidia_smi_log>
"#;

    #[test]
    fn test_parse_nvidia_smi_xml_per_device_values() {
        let devices = parse_nvidia_smi_xml(TWO_GPUS).unwrap();
        assert_eq!(devices, vec![None, Some(37.0)]);
    }

    #[test]
    fn test_failed_device_contributes_zero_to_mean() {
        let devices = parse_nvidia_smi_xml(TWO_GPUS).unwrap();
        let reading = aggregate_utilization(&devices);

        assert_eq!(
            reading,
            GpuReading::Utilization {
                percent: 18.5,
                devices: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_zero_devices_is_unavailable() {
        let xml = "<nvidia_smi_log><attached_gpus>0</attached_gpus></nvidia_smi_log>";
        let devices = parse_nvidia_smi_xml(xml).unwrap();

        assert!(devices.is_empty());
        assert_eq!(aggregate_utilization(&devices), GpuReading::Unavailable);
    }

    #[test]
    fn test_device_without_utilization_block_counts_as_failed() {
        let xml = concat!(
            "<nvidia_smi_log><gpu id=\"0\">",
            "<product_name>x</product_name>",
            "</gpu></nvidia_smi_log>"
        );
        assert_eq!(parse_nvidia_smi_xml(xml).unwrap(), vec![None]);
    }

    #[test]
    fn test_garbage_output_is_probe_error() {
        let err = parse_nvidia_smi_xml("<nvidia_smi_log><gpu>").unwrap_err();
        assert!(matches!(err, CmdprofError::Probe(_)));
    }

    #[test]
    fn test_parse_util_value_formats() {
        assert_eq!(parse_util_value("37 %"), Some(37.0));
        assert_eq!(parse_util_value("5%"), Some(5.0));
        assert_eq!(parse_util_value("N/A"), None);
        assert_eq!(parse_util_value(""), None);
    }

    #[test]
    fn test_no_gpu_probe_is_absent() {
        let mut probe = NoGpu;
        assert!(!probe.is_present());
        assert_eq!(probe.probe().unwrap(), GpuReading::Unavailable);
    }

    #[test]
    fn test_disabled_detection_returns_absent_probe() {
        assert!(!detect_probe(false).is_present());
    }

    #[test]
    fn test_find_on_path_skips_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path_var = env::join_paths([dir.path().join("missing"), dir.path().to_path_buf()])
            .unwrap();
        assert!(find_on_path(NVIDIA_SMI, Some(path_var)).is_none());
        assert!(find_on_path(NVIDIA_SMI, None).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_on_path_requires_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join(NVIDIA_SMI);
        fs::write(&program, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o644)).unwrap();

        let path_var = Some(dir.path().as_os_str().to_os_string());
        assert!(find_on_path(NVIDIA_SMI, path_var.clone()).is_none());

        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_on_path(NVIDIA_SMI, path_var), Some(program));
    }

    #[cfg(unix)]
    #[test]
    fn test_nvidia_smi_probe_runs_fake_utility() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let xml_path = dir.path().join("out.xml");
        fs::write(&xml_path, TWO_GPUS).unwrap();
        let program = dir.path().join(NVIDIA_SMI);
        let script = format!("#!/bin/sh\ncat '{}'\n", xml_path.display());
        fs::write(&program, script).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let mut probe = NvidiaSmi::new(&program);
        assert!(probe.is_present());
        assert_eq!(probe.probe().unwrap().percent(), Some(18.5));
    }

    #[cfg(unix)]
    #[test]
    fn test_nvidia_smi_probe_failing_utility_is_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join(NVIDIA_SMI);
        fs::write(&program, "#!/bin/sh\nexit 9\n").unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let err = NvidiaSmi::new(&program).probe().unwrap_err();
        assert!(matches!(err, CmdprofError::Probe(_)));
    }
}
