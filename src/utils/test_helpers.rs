use std::{cell::RefCell, rc::Rc};

use crate::{ErrorReport, Runtime};

/// Installs an error sink that records every report's message.
pub fn record_errors(rt: &mut Runtime) -> Rc<RefCell<Vec<String>>> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    rt.set_error_sink(move |report: ErrorReport| sink.borrow_mut().push(report.message));
    errors
}
