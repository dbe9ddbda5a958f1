use std::collections::HashMap;

use super::source::{synthetic_source, Location};

/// Interns name strings as locations backed by synthetic sources, so
/// synthesized names (`apply`, `create`, `$module-N`) flow through the same
/// location-keyed machinery as parsed ones.
#[derive(Default)]
pub struct Ident {
    map: HashMap<String, Location>,
}

impl Ident {
    pub fn ident(&mut self, name: &str) -> Location {
        if let Some(loc) = self.map.get(name) {
            return loc.clone();
        }
        let source = synthetic_source(name);
        let loc = Location::new(source, 0, name.len());
        self.map.insert(name.to_string(), loc.clone());
        loc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn interning_is_stable() {
        let mut ident = Ident::default();
        let a = ident.ident("apply");
        let b = ident.ident("apply");
        assert!(Rc::ptr_eq(&a.source, &b.source));
        assert_eq!(a.view(), "apply");
    }
}
