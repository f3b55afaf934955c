diesel::table! {
    datasets (id) {
        id -> Int4,
        #[max_length = 255]
        name -> Varchar,
        start_time -> Timestamptz,
        delta_time -> Numeric,
        avg_execution_time -> Numeric,
        avg_value -> Numeric,
        median_value -> Numeric,
        max_value -> Numeric,
        min_value -> Numeric,
    }
}

diesel::table! {
    data_points (id) {
        id -> Int8,
        dataset_id -> Int4,
        timestamp -> Timestamptz,
        execution_time -> Numeric,
        value -> Numeric,
    }
}

diesel::joinable!(data_points -> datasets (dataset_id));

diesel::allow_tables_to_appear_in_same_query!(datasets, data_points);
