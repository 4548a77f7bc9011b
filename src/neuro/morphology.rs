use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Serialised tree of cable sections, parents listed before children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Morphology {
    pub sections: Vec<SectionSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Qualified name such as `soma[0]` or `dend[12]`.
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Point on the parent the section's 0-end attaches to.
    #[serde(default = "default_parent_x")]
    pub parent_x: f64,
    /// µm
    pub length: f64,
    /// µm
    pub diam: f64,
    #[serde(default = "default_nseg")]
    pub nseg: usize,
}

fn default_parent_x() -> f64 {
    1.0
}

fn default_nseg() -> usize {
    1
}

/// Parameters of the synthetic SPN-like tree used when no morphology file
/// is configured.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchedSpec {
    pub primaries: usize,
    /// Bifurcation levels below each primary dendrite.
    pub depth: usize,
    pub dend_length: f64,
    pub dend_diam: f64,
    pub soma_diam: f64,
    pub axon_length: f64,
}

impl Default for BranchedSpec {
    fn default() -> Self {
        Self {
            primaries: 4,
            depth: 3,
            dend_length: 40.0,
            dend_diam: 1.0,
            soma_diam: 12.0,
            axon_length: 60.0,
        }
    }
}

impl Morphology {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Soma, one axon and `primaries` binary dendritic trees numbered depth
    /// first, with diameters tapering by branch order.
    pub fn branched(spec: &BranchedSpec) -> Self {
        let mut sections = vec![
            SectionSpec {
                name: "soma[0]".to_string(),
                parent: None,
                parent_x: 1.0,
                length: spec.soma_diam,
                diam: spec.soma_diam,
                nseg: 1,
            },
            SectionSpec {
                name: "axon[0]".to_string(),
                parent: Some("soma[0]".to_string()),
                parent_x: 0.0,
                length: spec.axon_length,
                diam: 0.7,
                nseg: 3,
            },
        ];

        let mut next = 0usize;
        for _ in 0..spec.primaries {
            push_subtree(&mut sections, spec, &mut next, "soma[0]", 0.5, 0);
        }

        Self { sections }
    }
}

fn push_subtree(
    sections: &mut Vec<SectionSpec>,
    spec: &BranchedSpec,
    next: &mut usize,
    parent: &str,
    parent_x: f64,
    order: usize,
) {
    let name = format!("dend[{next}]");
    *next += 1;

    let diam = (spec.dend_diam * 0.75f64.powi(order as i32)).max(0.3);
    let nseg = ((spec.dend_length / 10.0).ceil() as usize).max(1) | 1;

    sections.push(SectionSpec {
        name: name.clone(),
        parent: Some(parent.to_string()),
        parent_x,
        length: spec.dend_length,
        diam,
        nseg,
    });

    if order < spec.depth {
        for _ in 0..2 {
            push_subtree(sections, spec, next, &name, 1.0, order + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branched_tree_numbers_dendrites_depth_first() {
        let morph = Morphology::branched(&BranchedSpec::default());
        let dends: Vec<_> = morph
            .sections
            .iter()
            .filter(|s| s.name.starts_with("dend"))
            .collect();

        // 4 primaries x (1 + 2 + 4 + 8)
        assert_eq!(dends.len(), 60);
        assert_eq!(dends[0].parent.as_deref(), Some("soma[0]"));
        assert_eq!(dends[1].parent.as_deref(), Some("dend[0]"));
        assert_eq!(dends[2].parent.as_deref(), Some("dend[1]"));
        assert_eq!(dends[15].name, "dend[15]");
        assert_eq!(dends[15].parent.as_deref(), Some("soma[0]"));
        assert!(dends.iter().all(|s| s.nseg % 2 == 1));
    }

    #[test]
    fn loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.json");
        std::fs::write(
            &path,
            r#"{"sections":[
                {"name":"soma[0]","length":10,"diam":10},
                {"name":"dend[0]","parent":"soma[0]","length":100,"diam":1,"nseg":5}
            ]}"#,
        )
        .unwrap();

        let morph = Morphology::load(&path).unwrap();
        assert_eq!(morph.sections.len(), 2);
        assert_eq!(morph.sections[1].parent_x, 1.0);
        assert_eq!(morph.sections[0].nseg, 1);
    }
}
