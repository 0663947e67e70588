use serde::Serialize;
use tracing::{info, warn};

use crate::props;
use crate::retry::RetryPolicy;
use crate::store::{GraphStore, Label, NodePattern};
use crate::throttle::Throttle;

/// Verb form (`itype`) to its measure pattern.
pub const ITYPE_WAZN: &[(&str, &str)] = &[
    ("1", "فَعَلَ"),
    ("2", "فَاعَلَ"),
    ("3", "فَعَّلَ"),
    ("4", "أَفْعَلَ"),
    ("5", "تَفَعَّلَ"),
    ("6", "تَفَاعَلَ"),
    ("7", "انْفَعَلَ"),
    ("8", "افْتَعَلَ"),
    ("9", "افْعَلَّ"),
    ("10", "اسْتَفْعَلَ"),
    ("11", "افْعَالَّ"),
    ("12", "افْعَوَلَ"),
    ("13", "افْعَوَّلَ"),
    ("Q. 1", "فَعْلَلَ"),
    ("Q.1", "فَعْلَلَ"),
    ("Q. 2", "تَفَعْلَلَ"),
    ("Q.2", "تَفَعْلَلَ"),
    ("Q. 3", "افْعَنْلَلَ"),
    ("Q. 4", "افْعَلَلَّ"),
    ("Q. Q. 1", "فَعْلَلَ"),
    ("Q. Q. 2", "تَفَعْلَلَ"),
    ("Q. Q. 3", "افْعَنْلَلَ"),
    ("Q. Q. 4", "افْعَلَلَّ"),
    ("Q. Q.2", "تَفَعْلَلَ"),
    ("R. Q. 1", "فَعْلَلَ"),
    ("R. Q. 2", "تَفَعْلَلَ"),
    ("R. Q. 3", "افْعَنْلَلَ"),
    ("R. Q. 4", "افْعَلَلَّ"),
    ("R. Q.1", "فَعْلَلَ"),
    ("R.Q.1", "فَعْلَلَ"),
];

pub fn wazn_for_itype(itype: &str) -> Option<&'static str> {
    ITYPE_WAZN
        .iter()
        .find(|(t, _)| *t == itype)
        .map(|(_, wazn)| *wazn)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct WaznReport {
    /// Nodes updated per itype, in table order
    pub updated: Vec<(String, usize)>,
    pub errors: Vec<(String, String)>,
}

impl WaznReport {
    pub fn total(&self) -> usize {
        self.updated.iter().map(|(_, n)| n).sum()
    }
}

/// Set `wazn` on every Word whose `itype` appears in [`ITYPE_WAZN`].
pub async fn apply_itype_wazn(
    store: &dyn GraphStore,
    retry: &RetryPolicy,
    throttle: &mut Throttle,
) -> WaznReport {
    let mut report = WaznReport::default();

    for (itype, wazn) in ITYPE_WAZN {
        let pattern = NodePattern::new(Label::Word, props! { "itype" => *itype });
        let update = props! { "wazn" => *wazn };

        match retry
            .retry("set_wazn", || store.set_properties(&pattern, &update))
            .await
        {
            Ok(count) => {
                info!(itype = *itype, wazn = *wazn, updated = count, "Applied wazn");
                report.updated.push((itype.to_string(), count));
            }
            Err(e) => {
                warn!(itype = *itype, error = %e, "Failed to apply wazn");
                report.errors.push((itype.to_string(), e.to_string()));
            }
        }
        throttle.tick().await;
    }
    report
}
