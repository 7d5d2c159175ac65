use crate::SchemaError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileId {
    Gaming,
    AudioVideo,
    Minimal,
    HardwareOptimized,
    Custom,
}

impl ProfileId {
    pub const ALL: [ProfileId; 5] = [
        ProfileId::Gaming,
        ProfileId::AudioVideo,
        ProfileId::Minimal,
        ProfileId::HardwareOptimized,
        ProfileId::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileId::Gaming => "gaming",
            ProfileId::AudioVideo => "audio-video",
            ProfileId::Minimal => "minimal",
            ProfileId::HardwareOptimized => "hardware-optimized",
            ProfileId::Custom => "custom",
        }
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileId {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        ProfileId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .or(match wanted.as_str() {
                "audio" | "lowlatency" => Some(ProfileId::AudioVideo),
                "optimized" | "hardware" => Some(ProfileId::HardwareOptimized),
                _ => None,
            })
            .ok_or_else(|| SchemaError::UnknownProfile(s.to_owned()))
    }
}

/// Insertion-ordered `CONFIG_*` key/value overrides. Setting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverrides(Vec<(String, String)>);

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (k, v) in iter {
            out.set(k, v);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelProfile {
    pub id: ProfileId,
    pub name: String,
    /// Token appended to the kernel release, e.g. `gaming` in `6.12.4-custom-gaming`.
    pub suffix: String,
    pub description: String,
    pub overrides: ConfigOverrides,
    pub modules_to_disable: BTreeSet<String>,
}

/// Host hardware markers read once per run. All fields are lower-cased text
/// so matching is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareSignals {
    pub cpuinfo: String,
    pub pci_devices: String,
    pub nvme_present: bool,
}

impl HardwareSignals {
    pub fn new(cpuinfo: &str, pci_devices: &str, nvme_present: bool) -> Self {
        Self {
            cpuinfo: cpuinfo.to_lowercase(),
            pci_devices: pci_devices.to_lowercase(),
            nvme_present,
        }
    }
}

// Whole words only: "ati" also occurs in "compatible" and "corporation".
static GPU_VENDOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(nvidia|intel|amd|ati|advanced micro devices)\b")
        .expect("gpu vendor pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum GpuVendor {
    Nvidia,
    Intel,
    Amd,
}

fn gpu_vendor(word: &str) -> GpuVendor {
    match word {
        "nvidia" => GpuVendor::Nvidia,
        "intel" => GpuVendor::Intel,
        _ => GpuVendor::Amd,
    }
}

/// The device description of an lspci line for a display controller, i.e.
/// the text after the `<class>: ` separator.
fn display_device(line: &str) -> Option<&str> {
    let (class, device) = line.split_once(": ")?;
    let display = ["vga", "3d controller", "display"]
        .iter()
        .any(|marker| class.contains(marker));
    display.then_some(device)
}

/// Compute the `HardwareOptimized` overrides from probed signals. A signal
/// that is absent simply contributes nothing.
pub fn hardware_overrides(signals: &HardwareSignals) -> ConfigOverrides {
    let mut o = ConfigOverrides::new();
    o.set("CONFIG_PREEMPT", "y");
    o.set("CONFIG_HZ_1000", "y");
    o.set("CONFIG_HZ", "1000");

    if signals.cpuinfo.contains("authenticamd") {
        o.set("CONFIG_X86_AMD_PSTATE", "y");
    } else if signals.cpuinfo.contains("genuineintel") {
        o.set("CONFIG_X86_INTEL_PSTATE", "y");
    }

    let pci = &signals.pci_devices;
    let mut vendors = BTreeSet::new();
    for device in pci.lines().filter_map(display_device) {
        vendors.extend(GPU_VENDOR.find_iter(device).map(|m| gpu_vendor(m.as_str())));
    }
    if vendors.contains(&GpuVendor::Nvidia) {
        o.set("CONFIG_FB_NVIDIA", "y");
    }
    if vendors.contains(&GpuVendor::Intel) {
        o.set("CONFIG_DRM_I915", "y");
    }
    if vendors.contains(&GpuVendor::Amd) {
        o.set("CONFIG_DRM_AMDGPU", "y");
        o.set("CONFIG_DRM_AMDGPU_SI", "y");
        o.set("CONFIG_DRM_AMDGPU_CIK", "y");
    }

    if pci.contains("virtio") || pci.contains("qemu") {
        for key in [
            "CONFIG_VIRTIO",
            "CONFIG_VIRTIO_PCI",
            "CONFIG_VIRTIO_BLK",
            "CONFIG_VIRTIO_NET",
            "CONFIG_HYPERVISOR_GUEST",
        ] {
            o.set(key, "y");
        }
    } else if pci.contains("vmware") {
        for key in [
            "CONFIG_VMWARE_PVSCSI",
            "CONFIG_VMXNET3",
            "CONFIG_HYPERVISOR_GUEST",
            "CONFIG_VMWARE_BALLOON",
        ] {
            o.set(key, "y");
        }
    } else if pci.contains("virtualbox") || pci.contains("vbox") {
        o.set("CONFIG_DRM_VBOXVIDEO", "y");
        o.set("CONFIG_HYPERVISOR_GUEST", "y");
    }

    if signals.nvme_present {
        o.set("CONFIG_NVME_CORE", "y");
        o.set("CONFIG_BLK_DEV_NVME", "y");
    }
    o
}

fn overrides(pairs: &[(&str, &str)]) -> ConfigOverrides {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

fn gaming() -> KernelProfile {
    KernelProfile {
        id: ProfileId::Gaming,
        name: "Gaming".to_owned(),
        suffix: "gaming".to_owned(),
        description: "Low input latency, performance CPU governor and THP for games and streaming"
            .to_owned(),
        overrides: overrides(&[
            ("CONFIG_PREEMPT", "y"),
            ("CONFIG_PREEMPT_VOLUNTARY", "n"),
            ("CONFIG_PREEMPT_NONE", "n"),
            ("CONFIG_HZ_1000", "y"),
            ("CONFIG_HZ_300", "n"),
            ("CONFIG_HZ_250", "n"),
            ("CONFIG_HZ_100", "n"),
            ("CONFIG_HZ", "1000"),
            ("CONFIG_CPU_FREQ_GOV_PERFORMANCE", "y"),
            ("CONFIG_CPU_FREQ_DEFAULT_GOV_PERFORMANCE", "y"),
            ("CONFIG_CPU_FREQ_STAT", "n"),
            ("CONFIG_TRANSPARENT_HUGEPAGE", "y"),
            ("CONFIG_TRANSPARENT_HUGEPAGE_ALWAYS", "y"),
            ("CONFIG_DEBUG_INFO", "n"),
            ("CONFIG_DEBUG_KERNEL", "n"),
            ("CONFIG_FTRACE", "n"),
            ("CONFIG_MQ_IOSCHED_DEADLINE", "y"),
            ("CONFIG_MQ_IOSCHED_KYBER", "y"),
            ("CONFIG_FUTEX", "y"),
            ("CONFIG_FUTEX_PI", "y"),
        ]),
        modules_to_disable: BTreeSet::new(),
    }
}

fn audio_video() -> KernelProfile {
    KernelProfile {
        id: ProfileId::AudioVideo,
        name: "Audio / Video".to_owned(),
        suffix: "lowlatency".to_owned(),
        description: "Real-time preemption and tickless timers for DAWs and video production"
            .to_owned(),
        overrides: overrides(&[
            ("CONFIG_PREEMPT", "y"),
            ("CONFIG_PREEMPT_VOLUNTARY", "n"),
            ("CONFIG_PREEMPT_NONE", "n"),
            ("CONFIG_PREEMPT_RT", "y"),
            ("CONFIG_PREEMPT_RT_FULL", "y"),
            ("CONFIG_HZ_1000", "y"),
            ("CONFIG_HZ", "1000"),
            ("CONFIG_NO_HZ_FULL", "y"),
            ("CONFIG_NO_HZ", "y"),
            ("CONFIG_HIGH_RES_TIMERS", "y"),
            ("CONFIG_RT_GROUP_SCHED", "y"),
            ("CONFIG_CPU_IDLE", "n"),
            ("CONFIG_SND_USB_AUDIO", "y"),
            ("CONFIG_SND_FIREWIRE", "y"),
            ("CONFIG_DEBUG_INFO", "n"),
            ("CONFIG_DEBUG_KERNEL", "n"),
        ]),
        modules_to_disable: BTreeSet::new(),
    }
}

fn minimal() -> KernelProfile {
    KernelProfile {
        id: ProfileId::Minimal,
        name: "Minimal / Office".to_owned(),
        suffix: "minimal".to_owned(),
        description: "Lean kernel for office use, older hardware and virtual machines".to_owned(),
        overrides: overrides(&[
            ("CONFIG_PREEMPT_VOLUNTARY", "y"),
            ("CONFIG_PREEMPT", "n"),
            ("CONFIG_HZ_250", "y"),
            ("CONFIG_HZ", "250"),
            ("CONFIG_CPU_FREQ_GOV_POWERSAVE", "y"),
            ("CONFIG_CPU_FREQ_GOV_ONDEMAND", "y"),
            ("CONFIG_CPU_IDLE", "y"),
            ("CONFIG_DEBUG_INFO", "n"),
            ("CONFIG_DEBUG_KERNEL", "n"),
            ("CONFIG_FTRACE", "n"),
            ("CONFIG_KPROBES", "n"),
            ("CONFIG_PROFILING", "n"),
            ("CONFIG_OPROFILE", "n"),
            ("CONFIG_VIRTIO", "y"),
            ("CONFIG_VIRTIO_PCI", "y"),
            ("CONFIG_VIRTIO_BLK", "y"),
            ("CONFIG_VIRTIO_NET", "y"),
            ("CONFIG_VMWARE_PVSCSI", "y"),
            ("CONFIG_VMXNET3", "y"),
            ("CONFIG_HYPERVISOR_GUEST", "y"),
            ("CONFIG_VMWARE_BALLOON", "y"),
            ("CONFIG_DRM_VBOXVIDEO", "y"),
            ("CONFIG_NVME_CORE", "y"),
            ("CONFIG_BLK_DEV_NVME", "y"),
            ("CONFIG_SATA_AHCI", "y"),
            ("CONFIG_ATA", "y"),
            ("CONFIG_SCSI", "y"),
            ("CONFIG_BLK_DEV_SD", "y"),
            ("CONFIG_PCI", "y"),
            ("CONFIG_PCI_MSI", "y"),
        ]),
        modules_to_disable: [
            "JOYSTICK",
            "GAMEPORT",
            "REISERFS_FS",
            "JFS_FS",
            "NILFS2_FS",
            "ATALK",
            "IPX",
            "DECNET",
            "HAMRADIO",
            "IRDA",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect(),
    }
}

fn hardware_optimized(signals: &HardwareSignals) -> KernelProfile {
    KernelProfile {
        id: ProfileId::HardwareOptimized,
        name: "Hardware Optimized".to_owned(),
        suffix: "optimized".to_owned(),
        description: "Drivers and timer settings chosen from the detected CPU, GPU and platform"
            .to_owned(),
        overrides: hardware_overrides(signals),
        modules_to_disable: BTreeSet::new(),
    }
}

fn custom() -> KernelProfile {
    KernelProfile {
        id: ProfileId::Custom,
        name: "Custom".to_owned(),
        suffix: "custom".to_owned(),
        description: "The running kernel's configuration with no profile overrides".to_owned(),
        overrides: ConfigOverrides::new(),
        modules_to_disable: BTreeSet::new(),
    }
}

/// The static profile catalog. The hardware-optimized entry is built from
/// signals supplied at construction and then behaves like any other profile.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: Vec<KernelProfile>,
}

impl ProfileCatalog {
    pub fn new(signals: &HardwareSignals) -> Self {
        Self {
            profiles: vec![
                gaming(),
                audio_video(),
                minimal(),
                hardware_optimized(signals),
                custom(),
            ],
        }
    }

    pub fn get(&self, id: ProfileId) -> &KernelProfile {
        // Every ProfileId has exactly one entry, see `new`.
        self.profiles
            .iter()
            .find(|p| p.id == id)
            .unwrap_or(&self.profiles[self.profiles.len() - 1])
    }

    pub fn all(&self) -> &[KernelProfile] {
        &self.profiles
    }

    /// Every suffix a kforge-built kernel release can end with.
    pub fn suffixes(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.suffix.as_str())
    }

    pub fn by_suffix(&self, suffix: &str) -> Option<&KernelProfile> {
        self.profiles.iter().find(|p| p.suffix == suffix)
    }
}
