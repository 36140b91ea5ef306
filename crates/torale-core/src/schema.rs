// Diesel table definitions for the execution engine's persisted state
// (spec.md §6, "Persisted state layout").

diesel::table! {
    use diesel::sql_types::*;

    tasks (id) {
        id -> Uuid,
        user_id -> Text,
        name -> Text,
        schedule -> Varchar,
        search_query -> Text,
        condition_description -> Text,
        notify_behavior -> Varchar,
        config -> Jsonb,
        is_active -> Bool,
        last_execution_id -> Nullable<Uuid>,
        last_known_state -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    executions (id) {
        id -> Uuid,
        task_id -> Uuid,
        status -> Varchar,
        started_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        answer -> Nullable<Text>,
        evaluation -> Nullable<Text>,
        current_state -> Nullable<Jsonb>,
        condition_met -> Nullable<Bool>,
        change_summary -> Nullable<Text>,
        grounding_sources -> Jsonb,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    delivery_records (id) {
        id -> Uuid,
        execution_id -> Uuid,
        channel -> Varchar,
        status -> Varchar,
        delivered_at -> Nullable<Timestamptz>,
        provider_message_id -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

// Owned by the WorkflowRuntime (spec.md §6, §9 "Schedule state duplicated in
// two stores"). `tasks.is_active` is the source of truth; this table is the
// runtime's durable view of the same fact plus its own bookkeeping.
diesel::table! {
    use diesel::sql_types::*;

    schedules (task_id) {
        task_id -> Uuid,
        cron_expression -> Varchar,
        paused -> Bool,
        next_fire_at -> Nullable<Timestamptz>,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(executions -> tasks (task_id));
diesel::joinable!(schedules -> tasks (task_id));

diesel::allow_tables_to_appear_in_same_query!(
    tasks,
    executions,
    delivery_records,
    schedules,
);
