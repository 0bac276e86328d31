use std::sync::Arc;

use offc_dcbm::DcbmOffload;
use offc_mtcopy::CpuMtOffload;
use offc_registry::Registry;

use crate::attr::{
    ActiveMigratorAttr, Attribute, ControlError, NrDmaChanAttr, OffloadingAttr, ThreadsAttr,
};

/// A directory of attributes.
pub struct Kobject {
    name: String,
    attrs: Vec<Arc<dyn Attribute>>,
}

impl Kobject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, attr: Arc<dyn Attribute>) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&Arc<dyn Attribute>> {
        self.attrs.iter().find(|a| a.name() == name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = &Arc<dyn Attribute>> {
        self.attrs.iter()
    }
}

/// The control tree, addressed by `dir/attr` paths.
#[derive(Default)]
pub struct SysfsRoot {
    dirs: Vec<Kobject>,
}

impl SysfsRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cpu_mt/{offloading,threads}`, `dcbm/{offloading,nr_dma_chan}` and
    /// `offc/active_migrator`.
    pub fn standard(
        registry: Arc<Registry>,
        cpu_mt: Arc<CpuMtOffload>,
        dcbm: Arc<DcbmOffload>,
    ) -> Self {
        let mut root = Self::new();
        root.add(
            Kobject::new("cpu_mt")
                .with_attr(Arc::new(OffloadingAttr::new(cpu_mt.clone())))
                .with_attr(Arc::new(ThreadsAttr::new(cpu_mt))),
        );
        root.add(
            Kobject::new("dcbm")
                .with_attr(Arc::new(OffloadingAttr::new(dcbm.clone())))
                .with_attr(Arc::new(NrDmaChanAttr::new(dcbm))),
        );
        root.add(Kobject::new("offc").with_attr(Arc::new(ActiveMigratorAttr::new(registry))));
        root
    }

    pub fn add(&mut self, kobj: Kobject) {
        self.dirs.push(kobj);
    }

    fn lookup(&self, path: &str) -> Result<&Arc<dyn Attribute>, ControlError> {
        let path = path.trim_start_matches('/');
        path.split_once('/')
            .and_then(|(dir, attr)| {
                self.dirs
                    .iter()
                    .find(|k| k.name() == dir)
                    .and_then(|k| k.attr(attr))
            })
            .ok_or_else(|| ControlError::NoSuchAttribute(path.to_owned()))
    }

    pub fn read(&self, path: &str) -> Result<String, ControlError> {
        Ok(self.lookup(path)?.show())
    }

    pub fn write(&self, path: &str, buf: &str) -> Result<usize, ControlError> {
        self.lookup(path)?.store(buf)
    }

    /// Every attribute path, in registration order.
    pub fn list(&self) -> Vec<String> {
        self.dirs
            .iter()
            .flat_map(|k| k.attrs().map(move |a| format!("{}/{}", k.name(), a.name())))
            .collect()
    }
}

impl std::fmt::Debug for SysfsRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysfsRoot")
            .field("attrs", &self.list())
            .finish()
    }
}
