//! Small hand-built cells shared by unit tests.

use std::collections::BTreeMap;

use crate::neuro::cell::{Biophysics, Cell, ChannelDensity};
use crate::neuro::mechanism::MechanismKind;
use crate::neuro::morphology::{Morphology, SectionSpec};

pub fn section(name: &str, parent: Option<&str>, parent_x: f64, length: f64) -> SectionSpec {
    SectionSpec {
        name: name.to_string(),
        parent: parent.map(str::to_string),
        parent_x,
        length,
        diam: 1.0,
        nseg: 1,
    }
}

/// Biophysics with the given channels at the same density in every class.
pub fn uniform_channels(kinds: &[MechanismKind], density: f64) -> Biophysics {
    Biophysics {
        channels: kinds
            .iter()
            .map(|&kind| {
                (
                    kind,
                    ChannelDensity {
                        soma: density,
                        dend: density,
                        axon: density,
                    },
                )
            })
            .collect(),
        ..Biophysics::default()
    }
}

/// soma[0] with dend[0..2] in a Y and an axon, naf and kaf everywhere.
pub fn small_cell() -> Cell {
    let mut dend0 = section("dend[0]", Some("soma[0]"), 1.0, 100.0);
    dend0.nseg = 3;
    let morph = Morphology {
        sections: vec![
            section("soma[0]", None, 1.0, 10.0),
            dend0,
            section("dend[1]", Some("dend[0]"), 1.0, 50.0),
            section("dend[2]", Some("dend[0]"), 1.0, 80.0),
            section("axon[0]", Some("soma[0]"), 0.0, 30.0),
        ],
    };
    let biophysics = uniform_channels(&[MechanismKind::Naf, MechanismKind::Kaf], 0.01);
    Cell::build(&morph, &biophysics, &BTreeMap::new()).expect("fixture cell builds")
}

/// One somatic compartment carrying a single kaf mechanism.
pub fn single_compartment(kinds: &[MechanismKind]) -> Cell {
    let morph = Morphology {
        sections: vec![section("soma[0]", None, 1.0, 10.0)],
    };
    Cell::build(&morph, &uniform_channels(kinds, 0.01), &BTreeMap::new())
        .expect("fixture cell builds")
}
