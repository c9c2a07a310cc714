#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use shoal_core::*;

    use crate::*;

    fn counter_definition(id: &str, start: i32) -> StoreDefinition<i32> {
        define_store(id, move |scope: &Scope| -> Result<Root<i32>> {
            let counter = scope.declare_state(
                FragmentDecl::new(start)
                    .named("counter")
                    .on("increment", |n| n + 1),
            )?;
            Ok(Root::new(counter.state, counter.actions))
        })
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn profile_definition() -> StoreDefinition<Profile> {
        define_store("profile", |scope: &Scope| -> Result<Root<Profile>> {
            let profile = scope.declare_state(
                FragmentDecl::new(Profile {
                    name: "ada".into(),
                    visits: 0,
                })
                .named("profile")
                .on("visit", |p: &Profile| Profile {
                    visits: p.visits + 1,
                    ..p.clone()
                })
                .on_payload("rename", |p: &Profile, name: &String| Profile {
                    name: name.clone(),
                    ..p.clone()
                }),
            )?;
            Ok(Root::new(profile.state, profile.actions))
        })
    }

    fn collect<T: Clone + 'static>(stream: &Stream<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sub = {
            let seen = seen.clone();
            stream.subscribe(move |v| seen.borrow_mut().push(v))
        };
        (seen, sub)
    }

    #[test]
    fn test_combined_state_is_keyed_by_definition() {
        let counter = counter_definition("counter", 3);
        let profile = profile_definition();
        let bound = combine_stores(&[&counter, &profile], StoreOptions::default()).unwrap();

        let snapshot = bound.first_snapshot().expect("ready without preloads");
        assert_eq!(snapshot.get::<i32>("counter"), Some(&3));
        assert_eq!(snapshot.get::<Profile>("profile").map(|p| p.visits), Some(0));
        assert!(snapshot.get::<String>("counter").is_none());
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["counter", "profile"]);
    }

    #[test]
    fn test_select_skips_unrelated_changes() {
        let counter = counter_definition("counter", 0);
        let profile = profile_definition();
        let bound = combine_stores(&[&counter, &profile], StoreOptions::default()).unwrap();

        let (names, _names_sub) = collect(&bound.select_eq(&profile, |p| p.name.clone()));
        let (counts, _counts_sub) = collect(&bound.select_eq(&counter, |n| *n));

        let profile_actions = bound.actions_for("profile").unwrap().clone();
        profile_actions.find("visit").unwrap().call();
        profile_actions.find("rename").unwrap().send("grace".to_string());
        bound.actions_for("counter").unwrap().find("increment").unwrap().call();

        assert_eq!(*names.borrow(), vec!["ada".to_string(), "grace".to_string()]);
        assert_eq!(*counts.borrow(), vec![0, 1]);
        assert_eq!(bound.state_of(&profile).map(|p| p.visits), Some(1));
    }

    #[test]
    fn test_select_with_custom_compare() {
        let counter = counter_definition("counter", 0);
        let bound = combine_stores(&[&counter], StoreOptions::default()).unwrap();

        // only report when the parity flips
        let (parity, _sub) = collect(&bound.select(&counter, |n| *n, |a, b| a % 2 == b % 2));
        let increment = bound.actions_for("counter").unwrap().find("increment").unwrap().clone();
        for _ in 0..3 {
            increment.call();
        }
        assert_eq!(*parity.borrow(), vec![0, 1, 2, 3]);

        let (steps, _steps) = collect(&bound.select(&counter, |n| *n / 2, |a, b| a == b));
        increment.call();
        increment.call();
        assert_eq!(*steps.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let first = counter_definition("counter", 1);
        let second = counter_definition("counter", 100);
        let bound = combine_stores(&[&first, &second], StoreOptions::default()).unwrap();

        let snapshot = bound.first_snapshot().unwrap();
        assert_eq!(snapshot.get::<i32>("counter"), Some(&1));
        assert_eq!(bound.store().fragment_keys().len(), 1);
    }

    #[test]
    fn test_clone_store_is_independent() {
        let counter = counter_definition("counter", 0);
        let a = counter.clone_store(StoreOptions::default()).unwrap();
        let b = counter.clone_store(StoreOptions::default()).unwrap();
        let _a = a.subscribe(|_| {});
        let _b = b.subscribe(|_| {});

        a.actions().find("increment").unwrap().call();

        assert_eq!(a.current(), Some(1));
        assert_eq!(b.current(), Some(0));
        assert_eq!(counter.id(), "counter");
    }

    #[test]
    fn test_first_snapshot_waits_for_preloads() {
        let gate: Subject<ActionList> = Subject::new();
        let gated = define_store("gated", {
            let gate = gate.clone();
            move |scope: &Scope| -> Result<Root<i32>> {
                let counter = scope.declare_state(FragmentDecl::new(7))?;
                let gate = gate.clone();
                scope.declare_preload_effect(move || gate.stream())?;
                Ok(Root::new(counter.state, counter.actions))
            }
        });
        let bound = combine_stores(&[&gated], StoreOptions::default()).unwrap();

        assert!(bound.first_snapshot().is_none());
        assert!(!bound.is_ready());

        let _sub = bound.store().subscribe(|_| {});
        gate.next(ActionList::new());
        let snapshot = bound.first_snapshot().expect("ready after the preload emitted");
        assert_eq!(snapshot.get::<i32>("gated"), Some(&7));
    }

    #[test]
    fn test_initial_state_until_first_publish() {
        let gate: Subject<ActionList> = Subject::new();
        let gated = define_store("gated", {
            let gate = gate.clone();
            move |scope: &Scope| -> Result<Root<i32>> {
                let counter = scope.declare_state(FragmentDecl::new(7))?;
                let gate = gate.clone();
                scope.declare_preload_effect(move || gate.stream())?;
                Ok(Root::new(counter.state, counter.actions))
            }
        })
        .with_initial(-1);
        assert_eq!(gated.initial(), Some(&-1));

        let bound = combine_stores(&[&gated], StoreOptions::default()).unwrap();
        let _sub = bound.store().subscribe(|_| {});
        assert_eq!(bound.state_of(&gated), Some(-1));

        gate.next(ActionList::new());
        assert_eq!(bound.state_of(&gated), Some(7));

        let plain = counter_definition("plain", 0);
        assert!(plain.initial().is_none());
        assert_eq!(plain.with_initial(5).initial(), Some(&5));
    }

    #[test]
    fn test_errors_from_definitions_propagate() {
        let broken = define_store("broken", |_: &Scope| None::<Root<i32>>);
        let result = combine_stores(&[&broken], StoreOptions::default());
        assert!(matches!(result.err(), Some(StoreError::Configuration(_))));
    }
}
