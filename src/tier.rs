#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Molecule,
    Neuron,
    Synapse,
    Brain,
    Singularity,
}

impl Tier {
    /// Lowest tier first.
    pub const ALL: [Tier; 5] = [
        Tier::Molecule,
        Tier::Neuron,
        Tier::Synapse,
        Tier::Brain,
        Tier::Singularity,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Tier::Molecule => "MOLECULE",
            Tier::Neuron => "NEURON",
            Tier::Synapse => "SYNAPSE",
            Tier::Brain => "BRAIN",
            Tier::Singularity => "SINGULARITY",
        }
    }

    /// Hex color token used by the renderer.
    pub fn color(self) -> &'static str {
        match self {
            Tier::Molecule => "#FACC15",
            Tier::Neuron => "#FB923C",
            Tier::Synapse => "#3B82F6",
            Tier::Brain => "#A855F7",
            Tier::Singularity => "#22C55E",
        }
    }

    pub fn min_level(self) -> i64 {
        match self {
            Tier::Molecule => 0,
            Tier::Neuron => 7,
            Tier::Synapse => 18,
            Tier::Brain => 36,
            Tier::Singularity => 54,
        }
    }

    pub fn level_range_label(self) -> String {
        let next = Tier::ALL
            .iter()
            .copied()
            .find(|tier| tier.min_level() > self.min_level());
        match next {
            Some(next) => format!("level {}-{}", self.min_level(), next.min_level() - 1),
            None => format!("level {} upward", self.min_level()),
        }
    }
}

pub fn classify(level: i64) -> Tier {
    if level >= 54 {
        Tier::Singularity
    } else if level >= 36 {
        Tier::Brain
    } else if level >= 18 {
        Tier::Synapse
    } else if level >= 7 {
        Tier::Neuron
    } else {
        Tier::Molecule
    }
}
