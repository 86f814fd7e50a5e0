/// Emotion label counts for one listening session of one track.
///
/// Labels are kept in the order they were first seen, which is what makes
/// [`EmotionHistogram::majority`] deterministic on ties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmotionHistogram {
    counts: Vec<(String, u32)>,
}

impl EmotionHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: &str) {
        match self.counts.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((label.to_string(), 1)),
        }
    }

    pub fn count(&self, label: &str) -> u32 {
        self.counts
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|(_, c)| c).sum()
    }

    /// The most observed label. On ties the label inserted first wins.
    pub fn majority(&self) -> Option<&str> {
        let mut best: Option<(&str, u32)> = None;
        for (label, count) in &self.counts {
            let exceeds = match best {
                Some((_, max)) => *count > max,
                None => true,
            };
            if exceeds {
                best = Some((label, *count));
            }
        }
        best.map(|(label, _)| label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(l, c)| (l.as_str(), *c))
    }
}
