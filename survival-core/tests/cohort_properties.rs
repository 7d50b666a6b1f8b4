use proptest::prelude::*;
use survival_core::{
    build_cohort, CareLevel, GroupBy, GroupOrder, Observation, PatientId, SurvivalConfig,
};

fn care_level() -> impl Strategy<Value = Option<CareLevel>> {
    prop_oneof![
        Just(None),
        Just(Some(CareLevel::Low)),
        Just(Some(CareLevel::Medium)),
        Just(Some(CareLevel::High)),
    ]
}

fn observation() -> impl Strategy<Value = Observation> {
    (
        0u64..1_000,
        proptest::option::of(-30i64..400),
        any::<bool>(),
        proptest::option::of(prop_oneof![
            Just("Cancer".to_string()),
            Just("COPD".to_string()),
            Just("Heart failure".to_string()),
            Just("  ".to_string()),
        ]),
        care_level(),
    )
        .prop_map(|(id, duration, event, diagnosis, level)| Observation {
            subject: PatientId(id),
            duration_days: duration,
            event_occurred: event,
            diagnosis,
            care_level: level,
        })
}

fn group_by() -> impl Strategy<Value = GroupBy> {
    prop_oneof![
        Just(GroupBy::Overall),
        Just(GroupBy::Diagnosis),
        Just(GroupBy::CareLevel),
    ]
}

fn config() -> impl Strategy<Value = SurvivalConfig> {
    prop_oneof![Just(GroupOrder::FirstSeen), Just(GroupOrder::Lexicographic)].prop_map(|order| {
        SurvivalConfig {
            group_order: order,
            ..SurvivalConfig::default()
        }
    })
}

fn is_valid(obs: &Observation) -> bool {
    matches!(obs.duration_days, Some(days) if days >= 0)
}

fn valid_count(observations: &[Observation]) -> usize {
    observations.iter().filter(|obs| is_valid(obs)).count()
}

fn has_group_key(obs: &Observation, group_by: GroupBy) -> bool {
    match group_by {
        GroupBy::Overall => true,
        GroupBy::Diagnosis => obs
            .diagnosis
            .as_deref()
            .is_some_and(|diagnosis| !diagnosis.trim().is_empty()),
        GroupBy::CareLevel => obs.care_level.is_some(),
    }
}

proptest! {
    #[test]
    fn every_member_has_a_usable_duration(
        observations in prop::collection::vec(observation(), 0..60),
        group_by in group_by(),
        config in config(),
    ) {
        let set = build_cohort(&observations, group_by, &config);
        for group in &set.groups {
            prop_assert!(!group.is_empty());
            for obs in group.observations() {
                prop_assert!(matches!(obs.duration_days, Some(days) if days >= 0));
            }
        }
    }

    #[test]
    fn building_twice_gives_identical_output(
        observations in prop::collection::vec(observation(), 0..60),
        group_by in group_by(),
        config in config(),
    ) {
        let first = build_cohort(&observations, group_by, &config);
        let second = build_cohort(&observations, group_by, &config);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn grouped_members_never_exceed_valid_observations(
        observations in prop::collection::vec(observation(), 0..60),
        group_by in group_by(),
    ) {
        let set = build_cohort(&observations, group_by, &SurvivalConfig::default());
        let valid = valid_count(&observations);

        prop_assert!(set.member_count() <= valid);
        prop_assert_eq!(set.member_count() + set.excluded.len(), observations.len());
        let every_valid_keyed = observations
            .iter()
            .filter(|obs| is_valid(obs))
            .all(|obs| has_group_key(obs, group_by));
        prop_assert_eq!(set.member_count() == valid, every_valid_keyed);
    }

    #[test]
    fn series_stay_aligned_with_their_group(
        observations in prop::collection::vec(observation(), 0..60),
        group_by in group_by(),
    ) {
        let set = build_cohort(&observations, group_by, &SurvivalConfig::default());
        for group in &set.groups {
            let series = group.to_series();
            prop_assert_eq!(series.durations.len(), group.len());
            prop_assert_eq!(series.events.len(), group.len());
            for (obs, (duration, event)) in group
                .observations()
                .iter()
                .zip(series.durations.iter().zip(&series.events))
            {
                prop_assert_eq!(obs.duration_days.map(|d| d as f64), Some(*duration));
                prop_assert_eq!(obs.event_occurred, *event);
            }
        }
    }

    #[test]
    fn all_invalid_input_yields_no_data(
        ids in prop::collection::vec(0u64..100, 0..20),
        group_by in group_by(),
    ) {
        let observations: Vec<Observation> = ids
            .into_iter()
            .map(|id| Observation::new(PatientId(id), None, true))
            .collect();
        let set = build_cohort(&observations, group_by, &SurvivalConfig::default());
        prop_assert!(set.is_empty());
    }
}
